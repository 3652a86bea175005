//! Job lifecycle shared by every backend adapter.
//!
//! A [`Job`] is one outstanding request to a backend. It moves
//! `Pending -> Running -> Succeeded | Failed | TimedOut` and carries a
//! result reference only once it has succeeded.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a backend signals that a job has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Submit returns an id; completion is discovered by polling a status endpoint.
    PollBased,
    /// A single call that returns only when the result is ready.
    Blocking,
    /// Completion is pushed over an event stream observed by a listener.
    StreamBased,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            JobKind::PollBased => "poll_based",
            JobKind::Blocking => "blocking",
            JobKind::StreamBased => "stream_based",
        }
    }
}

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    TimedOut,
}

impl JobState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed(_) | JobState::TimedOut
        )
    }
}

/// Opaque handle to a retrievable backend output (URL, file id, encoded
/// view parameters). Only the adapter that produced it interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wrap a backend handle. Returns `None` for an empty handle so a
    /// succeeded job can never carry an empty result.
    pub fn new(handle: impl Into<String>) -> Option<Self> {
        let handle = handle.into();
        if handle.trim().is_empty() {
            None
        } else {
            Some(Self(handle))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle returned by `submit`, passed back to `await_result`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub job_id: String,
    pub kind: JobKind,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
        }
    }
}

/// Step-level progress reported by a stream-based backend.
///
/// The denominator is never zero: a missing or zero `max` is stored as 1,
/// so [`percent`](Self::percent) is always defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    value: u32,
    max: u32,
}

impl Default for Progress {
    fn default() -> Self {
        Self { value: 0, max: 1 }
    }
}

impl Progress {
    pub fn new(value: u32, max: u32) -> Self {
        Self {
            value,
            max: max.max(1),
        }
    }

    /// Build from the signed counters carried by stream events; negative
    /// values are treated as zero.
    pub fn from_raw(value: i64, max: i64) -> Self {
        let clamp = |v: i64| u32::try_from(v.max(0)).unwrap_or(u32::MAX);
        Self::new(clamp(value), clamp(max))
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Completion percentage, `0.0..=100.0` for well-formed counters.
    pub fn percent(&self) -> f64 {
        (self.value as f64 / self.max as f64) * 100.0
    }
}

/// One outstanding request to a backend.
///
/// Mutated only through the transition methods, which enforce that
/// `result_ref` is set iff the state is [`JobState::Succeeded`] and that a
/// terminal state is applied at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    state: JobState,
    progress: Progress,
    current_stage: Option<String>,
    result_ref: Option<ArtifactRef>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            state: JobState::Pending,
            progress: Progress::default(),
            current_stage: None,
            result_ref: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Backend stage (node, phase) currently executing, if reported.
    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub fn result_ref(&self) -> Option<&ArtifactRef> {
        self.result_ref.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Mark the job as running, optionally recording the active stage.
    /// Returns `false` if the job was already terminal.
    pub fn start(&mut self, stage: Option<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = JobState::Running;
        if stage.is_some() {
            self.current_stage = stage;
        }
        true
    }

    /// Record progress. Ignored once terminal.
    pub fn set_progress(&mut self, progress: Progress) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.progress = progress;
        true
    }

    /// Terminal success. `artifact` may be `None` for stream-based jobs
    /// whose result is located later via history; in that case a
    /// placeholder referencing the job id is stored so the invariant holds.
    pub fn succeed(&mut self, artifact: Option<ArtifactRef>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let artifact = artifact.unwrap_or_else(|| ArtifactRef(self.job_id.clone()));
        self.state = JobState::Succeeded;
        self.result_ref = Some(artifact);
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = JobState::Failed(message.into());
        true
    }

    pub fn time_out(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = JobState::TimedOut;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_with_zero_max_defaults_denominator() {
        let p = Progress::new(1, 0);
        assert_eq!(p.max(), 1);
        assert_eq!(p.percent(), 100.0);

        let p = Progress::from_raw(0, 0);
        assert_eq!(p.percent(), 0.0);
    }

    #[test]
    fn progress_default_is_zero_of_one() {
        let p = Progress::default();
        assert_eq!((p.value(), p.max()), (0, 1));
        assert_eq!(p.percent(), 0.0);
    }

    #[test]
    fn progress_percent_halfway() {
        assert_eq!(Progress::new(10, 20).percent(), 50.0);
    }

    #[test]
    fn negative_raw_counters_clamp_to_zero() {
        let p = Progress::from_raw(-3, -1);
        assert_eq!((p.value(), p.max()), (0, 1));
    }

    #[test]
    fn result_ref_only_set_on_success() {
        let mut job = Job::new("j1", JobKind::PollBased);
        assert!(job.result_ref().is_none());
        assert!(job.start(None));
        assert!(job.result_ref().is_none());
        assert!(job.succeed(ArtifactRef::new("file-9")));
        assert_eq!(job.state(), &JobState::Succeeded);
        assert_eq!(job.result_ref().map(ArtifactRef::as_str), Some("file-9"));
    }

    #[test]
    fn failed_job_has_no_result() {
        let mut job = Job::new("j1", JobKind::StreamBased);
        assert!(job.fail("boom"));
        assert!(job.result_ref().is_none());
        assert_eq!(job.state(), &JobState::Failed("boom".into()));
    }

    #[test]
    fn terminal_transition_applies_once() {
        let mut job = Job::new("j1", JobKind::StreamBased);
        assert!(job.succeed(None));
        assert!(!job.fail("late error"));
        assert!(!job.time_out());
        assert!(!job.start(Some("42".into())));
        assert!(!job.set_progress(Progress::new(1, 2)));
        assert_eq!(job.state(), &JobState::Succeeded);
        assert_eq!(job.result_ref().map(ArtifactRef::as_str), Some("j1"));
    }

    #[test]
    fn empty_artifact_handle_rejected() {
        assert!(ArtifactRef::new("").is_none());
        assert!(ArtifactRef::new("   ").is_none());
        assert!(ArtifactRef::new("x").is_some());
    }

    #[test]
    fn start_keeps_previous_stage_when_none_given() {
        let mut job = Job::new("j1", JobKind::StreamBased);
        job.start(Some("7".into()));
        job.start(None);
        assert_eq!(job.current_stage(), Some("7"));
    }
}
