use std::time::Duration;

use crate::types::ShotId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: ShotId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single backend job or pipeline stage.
///
/// Adapters return these unchanged; the shot pipeline attaches the stage
/// and shot identity on top.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Transport-level failure (network, non-2xx status, undecodable body).
    /// Never retried.
    #[error("Request failed: {0}")]
    Request(String),

    /// The backend reported an explicit, terminal failure.
    #[error("Backend reported failure: {0}")]
    RemoteFailure(String),

    /// No terminal state was observed within the wait budget. The remote
    /// job is abandoned, not cancelled.
    #[error("Timed out after {}s waiting for job {job_id}", waited.as_secs())]
    TimedOut { job_id: String, waited: Duration },

    /// The job succeeded but its artifact could not be retrieved.
    #[error("Result unavailable: {0}")]
    ResultUnavailable(String),

    /// A stage was invoked before the artifact it consumes existed.
    #[error("Dependency unmet: {stage} requires {missing}")]
    DependencyUnmet {
        stage: &'static str,
        missing: &'static str,
    },

    /// The event stream listener for the job's session is gone, so the job
    /// could not be observed to completion.
    #[error("Event listener lost while waiting for job {job_id}")]
    ListenerLost { job_id: String },
}

impl JobError {
    /// Short machine-readable label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Request(_) => "request_error",
            JobError::RemoteFailure(_) => "remote_failure",
            JobError::TimedOut { .. } => "timed_out",
            JobError::ResultUnavailable(_) => "result_unavailable",
            JobError::DependencyUnmet { .. } => "dependency_unmet",
            JobError::ListenerLost { .. } => "listener_lost",
        }
    }
}
