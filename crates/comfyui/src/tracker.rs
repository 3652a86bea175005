//! Shared per-job state for stream-based jobs.
//!
//! The listener task writes job transitions as events arrive; pipeline
//! workers wait on them. Each job lives in its own
//! [`tokio::sync::watch`] channel, so a waiter always sees the latest
//! state first and cannot miss a transition that happened before it
//! started waiting.
//!
//! A prompt is *claimed* by [`JobTracker::register`] or
//! [`JobTracker::wait`]. Events can outrun the submit response, so the
//! listener may open an unclaimed entry for a prompt it has not seen
//! yet; at most [`UNCLAIMED_LIMIT`] of those are kept, oldest evicted
//! first. Every exit from `wait` drops the entry, and the id is then
//! remembered among the last [`CONSUMED_MEMORY`] consumed prompts so a
//! late event cannot bring it back.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use mvforge_core::error::JobError;
use mvforge_core::job::{Job, JobKind, JobState, Progress};

/// Entries the listener may open before anyone claims them.
pub const UNCLAIMED_LIMIT: usize = 64;

/// Consumed prompt ids whose late events are still recognised and dropped.
pub const CONSUMED_MEMORY: usize = 256;

/// Tracks every outstanding prompt submitted through one session.
#[derive(Default)]
pub struct JobTracker {
    inner: Mutex<TrackerState>,
}

struct Tracked {
    tx: watch::Sender<Job>,
    claimed: bool,
}

impl Tracked {
    fn new(prompt_id: &str, claimed: bool) -> Self {
        Self {
            tx: watch::channel(Job::new(prompt_id, JobKind::StreamBased)).0,
            claimed,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    jobs: HashMap<String, Tracked>,
    /// Unclaimed prompt ids, oldest first.
    unclaimed: VecDeque<String>,
    /// Recently consumed prompt ids, oldest first.
    consumed: VecDeque<String>,
    /// Prompt currently executing; progress events without a prompt id
    /// are attributed to it.
    executing: Option<String>,
}

impl TrackerState {
    /// Entry for a listener update. Consumed prompts get none; unknown
    /// ones get a new unclaimed entry.
    fn observe(&mut self, prompt_id: &str) -> Option<&watch::Sender<Job>> {
        if self.consumed.iter().any(|id| id == prompt_id) {
            return None;
        }
        if !self.jobs.contains_key(prompt_id) {
            if self.unclaimed.len() >= UNCLAIMED_LIMIT {
                if let Some(oldest) = self.unclaimed.pop_front() {
                    tracing::debug!(prompt_id = %oldest, "Evicting unclaimed prompt");
                    self.jobs.remove(&oldest);
                }
            }
            self.unclaimed.push_back(prompt_id.to_string());
            self.jobs
                .insert(prompt_id.to_string(), Tracked::new(prompt_id, false));
        }
        self.jobs.get(prompt_id).map(|tracked| &tracked.tx)
    }

    /// Entry for a caller that will consume the result.
    fn claim(&mut self, prompt_id: &str) -> &watch::Sender<Job> {
        self.consumed.retain(|id| id != prompt_id);
        self.unclaimed.retain(|id| id != prompt_id);
        let tracked = self
            .jobs
            .entry(prompt_id.to_string())
            .or_insert_with(|| Tracked::new(prompt_id, true));
        tracked.claimed = true;
        &tracked.tx
    }

    fn consume(&mut self, prompt_id: &str) {
        self.jobs.remove(prompt_id);
        self.unclaimed.retain(|id| id != prompt_id);
        if self.executing.as_deref() == Some(prompt_id) {
            self.executing = None;
        }
        if !self.consumed.iter().any(|id| id == prompt_id) {
            if self.consumed.len() >= CONSUMED_MEMORY {
                self.consumed.pop_front();
            }
            self.consumed.push_back(prompt_id.to_string());
        }
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a prompt (no-op if already claimed) and return a receiver
    /// for its state.
    pub fn register(&self, prompt_id: &str) -> watch::Receiver<Job> {
        self.state().claim(prompt_id).subscribe()
    }

    /// Apply `f` to the job's state, notifying waiters only if it changed.
    fn update<F>(&self, prompt_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut state = self.state();
        state
            .observe(prompt_id)
            .is_some_and(|tx| tx.send_if_modified(f))
    }

    /// Record that the prompt is executing, optionally on a given node.
    pub fn mark_running(&self, prompt_id: &str, node: Option<String>) -> bool {
        let applied = self.update(prompt_id, |job| job.start(node));
        if applied {
            self.state().executing = Some(prompt_id.to_string());
        }
        applied
    }

    /// Record step progress. Without a prompt id the progress goes to the
    /// currently executing prompt. Returns the prompt it was applied to.
    pub fn update_progress(&self, prompt_id: Option<&str>, progress: Progress) -> Option<String> {
        let target = match prompt_id {
            Some(id) => id.to_string(),
            None => self.state().executing.clone()?,
        };
        self.update(&target, |job| job.set_progress(progress))
            .then_some(target)
    }

    /// Terminal success. Returns `false` if the job was already terminal
    /// or has been consumed.
    pub fn mark_succeeded(&self, prompt_id: &str) -> bool {
        let applied = self.update(prompt_id, |job| job.succeed(None));
        self.clear_executing(prompt_id);
        applied
    }

    /// Terminal failure. Returns `false` if the job was already terminal
    /// or has been consumed.
    pub fn mark_failed(&self, prompt_id: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        let applied = self.update(prompt_id, |job| job.fail(message));
        self.clear_executing(prompt_id);
        applied
    }

    fn clear_executing(&self, prompt_id: &str) {
        let mut state = self.state();
        if state.executing.as_deref() == Some(prompt_id) {
            state.executing = None;
        }
    }

    /// Current state of a tracked job.
    pub fn snapshot(&self, prompt_id: &str) -> Option<Job> {
        self.state()
            .jobs
            .get(prompt_id)
            .map(|tracked| tracked.tx.borrow().clone())
    }

    /// Progress of a tracked job, for display. Advisory only.
    pub fn progress(&self, prompt_id: &str) -> Option<Progress> {
        self.snapshot(prompt_id).map(|job| job.progress())
    }

    /// Claimed prompt ids that have not reached a terminal state.
    pub fn outstanding(&self) -> Vec<String> {
        self.state()
            .jobs
            .iter()
            .filter(|(_, tracked)| tracked.claimed && !tracked.tx.borrow().is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a job once its result has been consumed. Later events for it
    /// are ignored.
    pub fn forget(&self, prompt_id: &str) {
        self.state().consume(prompt_id);
    }

    /// Block until the job reaches a terminal state or `timeout` elapses.
    ///
    /// Whatever the outcome, the job is dropped from the tracker before
    /// returning. A failed job yields [`JobError::RemoteFailure`]. On
    /// timeout [`JobError::TimedOut`] is returned; the remote prompt keeps
    /// running but nothing here follows it any more.
    pub async fn wait(&self, prompt_id: &str, timeout: Duration) -> Result<Job, JobError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.register(prompt_id);

        let outcome = tokio::time::timeout_at(deadline, async {
            rx.wait_for(Job::is_terminal).await.map(|job| job.clone())
        })
        .await;

        let job = match outcome {
            Ok(Ok(job)) => job,
            // Sender dropped: another caller consumed the job and nothing
            // can resolve it any more, so wait out the budget.
            Ok(Err(_)) => {
                tokio::time::sleep_until(deadline).await;
                return Err(self.timed_out(prompt_id, timeout));
            }
            Err(_) => return Err(self.timed_out(prompt_id, timeout)),
        };

        self.forget(prompt_id);
        match job.state() {
            JobState::Succeeded => Ok(job),
            JobState::Failed(message) => Err(JobError::RemoteFailure(message.clone())),
            _ => Err(JobError::TimedOut {
                job_id: prompt_id.to_string(),
                waited: timeout,
            }),
        }
    }

    fn timed_out(&self, prompt_id: &str, waited: Duration) -> JobError {
        {
            let mut state = self.state();
            if let Some(tracked) = state.jobs.get(prompt_id) {
                tracked.tx.send_if_modified(Job::time_out);
            }
            state.consume(prompt_id);
        }
        tracing::warn!(
            prompt_id,
            waited_secs = waited.as_secs(),
            "Gave up waiting for ComfyUI prompt",
        );
        JobError::TimedOut {
            job_id: prompt_id.to_string(),
            waited,
        }
    }
}
