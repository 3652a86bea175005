//! Fire-and-poll jobs.
//!
//! [`PollingAdapter`] wraps any [`PollBackend`] and turns its three raw
//! calls into the [`JobAdapter`] contract: sleep a fixed interval, query
//! status, repeat until a terminal state or the caller's timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use mvforge_core::error::JobError;
use mvforge_core::job::{ArtifactRef, JobHandle, JobKind};

use crate::adapter::JobAdapter;

/// Interval between status queries unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// One status query's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Not finished. Carries the backend's own status label for logging.
    InProgress(String),
    Succeeded(ArtifactRef),
    Failed(String),
}

/// Raw calls of a poll-based backend.
#[async_trait]
pub trait PollBackend: Send + Sync {
    type Request: Send + Sync;

    /// Start a job and return the backend's task id.
    async fn submit(&self, request: &Self::Request) -> Result<String, JobError>;

    async fn status(&self, job_id: &str) -> Result<PollStatus, JobError>;

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<(), JobError>;
}

/// Adapter driving a [`PollBackend`] at a fixed interval.
///
/// No backoff: the interval is short relative to job duration and the
/// backends tolerate it.
pub struct PollingAdapter<B> {
    backend: B,
    interval: Duration,
}

impl<B: PollBackend> PollingAdapter<B> {
    pub fn new(backend: B, interval: Duration) -> Self {
        Self { backend, interval }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_until_terminal(&self, job_id: &str) -> Result<ArtifactRef, JobError> {
        let mut polls = 0u32;
        loop {
            tokio::time::sleep(self.interval).await;
            polls += 1;

            match self.backend.status(job_id).await? {
                PollStatus::Succeeded(artifact) => {
                    tracing::info!(job_id, polls, "Poll-based job succeeded");
                    return Ok(artifact);
                }
                PollStatus::Failed(message) => {
                    tracing::warn!(job_id, polls, error = %message, "Poll-based job failed");
                    return Err(JobError::RemoteFailure(message));
                }
                PollStatus::InProgress(status) => {
                    tracing::debug!(job_id, polls, status = %status, "Job still in progress");
                }
            }
        }
    }
}

#[async_trait]
impl<B: PollBackend> JobAdapter for PollingAdapter<B> {
    type Request = B::Request;

    fn kind(&self) -> JobKind {
        JobKind::PollBased
    }

    async fn submit(&self, request: &Self::Request) -> Result<JobHandle, JobError> {
        let job_id = self.backend.submit(request).await?;
        Ok(JobHandle::new(job_id, JobKind::PollBased))
    }

    async fn await_result(
        &self,
        handle: &JobHandle,
        timeout: Duration,
    ) -> Result<ArtifactRef, JobError> {
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.poll_until_terminal(&handle.job_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    job_id = %handle.job_id,
                    waited_secs = timeout.as_secs(),
                    "Abandoning poll-based job",
                );
                Err(JobError::TimedOut {
                    job_id: handle.job_id.clone(),
                    waited: timeout,
                })
            }
        }
    }

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<PathBuf, JobError> {
        self.backend.fetch(artifact, dest).await?;
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    /// Answers status queries from a script; the last entry repeats.
    struct ScriptedBackend {
        script: Mutex<VecDeque<PollStatus>>,
        status_calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<PollStatus>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                status_calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.status_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PollBackend for ScriptedBackend {
        type Request = String;

        async fn submit(&self, _request: &String) -> Result<String, JobError> {
            Ok("task-1".into())
        }

        async fn status(&self, _job_id: &str) -> Result<PollStatus, JobError> {
            self.status_calls.lock().unwrap().push(Instant::now());
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script.front().cloned().unwrap())
            }
        }

        async fn fetch(&self, _artifact: &ArtifactRef, _dest: &Path) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn running() -> PollStatus {
        PollStatus::InProgress("Processing".into())
    }

    fn artifact(id: &str) -> ArtifactRef {
        ArtifactRef::new(id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn returns_artifact_after_running_twice() {
        let adapter = PollingAdapter::new(
            ScriptedBackend::new(vec![
                running(),
                running(),
                PollStatus::Succeeded(artifact("file-A")),
            ]),
            Duration::from_secs(10),
        );
        let started = Instant::now();

        let handle = adapter.submit(&"prompt".to_string()).await.unwrap();
        assert_eq!(handle.kind, JobKind::PollBased);
        let result = adapter
            .await_result(&handle, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(result, artifact("file-A"));
        let calls = adapter.backend().calls();
        assert_eq!(calls.len(), 3, "two in-progress answers, then success");
        // Every status query is preceded by a full interval.
        let first = calls[0] - started;
        let last = calls[2] - started;
        assert!(first >= Duration::from_secs(10) && first < Duration::from_secs(11), "{first:?}");
        assert!(last >= Duration::from_secs(30) && last < Duration::from_secs(31), "{last:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_failure_is_remote_failure() {
        let adapter = PollingAdapter::new(
            ScriptedBackend::new(vec![
                running(),
                PollStatus::Failed("content policy".into()),
            ]),
            Duration::from_secs(10),
        );
        let handle = adapter.submit(&String::new()).await.unwrap();
        let err = adapter
            .await_result(&handle, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_eq!(err, JobError::RemoteFailure("content policy".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_times_out_at_budget() {
        let adapter = PollingAdapter::new(ScriptedBackend::new(vec![running()]), Duration::from_secs(10));
        let handle = adapter.submit(&String::new()).await.unwrap();
        let started = Instant::now();

        let err = adapter
            .await_result(&handle, Duration::from_secs(45))
            .await
            .unwrap_err();

        assert_matches!(err, JobError::TimedOut { ref job_id, .. } if job_id == "task-1");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(45), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(46), "returned late: {elapsed:?}");
        assert_eq!(adapter.backend().calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn status_transport_error_surfaces_immediately() {
        struct Broken;

        #[async_trait]
        impl PollBackend for Broken {
            type Request = ();
            async fn submit(&self, _: &()) -> Result<String, JobError> {
                Ok("t".into())
            }
            async fn status(&self, _: &str) -> Result<PollStatus, JobError> {
                Err(JobError::Request("connection reset".into()))
            }
            async fn fetch(&self, _: &ArtifactRef, _: &Path) -> Result<(), JobError> {
                Ok(())
            }
        }

        let adapter = PollingAdapter::new(Broken, Duration::from_secs(10));
        let handle = adapter.submit(&()).await.unwrap();
        let err = adapter
            .await_result(&handle, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert_matches!(err, JobError::Request(_));
    }
}
