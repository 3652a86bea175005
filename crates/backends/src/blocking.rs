//! Single-call jobs.
//!
//! A blocking backend answers one request with the finished artifact.
//! [`BlockingAdapter`] still honours the `submit`/`await_result` split:
//! `submit` starts the call on its own task and `await_result` waits for
//! that task under the caller's timeout. A call that outlives the timeout
//! is detached and left to finish on its own.
//!
//! Calls that are submitted but never awaited do not accumulate: finished
//! ones are pruned on the next `submit`, and dropping the adapter aborts
//! whatever is still running.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use mvforge_core::error::JobError;
use mvforge_core::job::{ArtifactRef, JobHandle, JobKind};

use crate::adapter::JobAdapter;

/// Raw calls of a blocking backend.
#[async_trait]
pub trait BlockingBackend: Send + Sync + 'static {
    type Request: Clone + Send + Sync + 'static;

    /// Generate and return a handle to the finished artifact.
    async fn generate(&self, request: &Self::Request) -> Result<ArtifactRef, JobError>;

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<(), JobError>;
}

type InFlight = JoinHandle<Result<ArtifactRef, JobError>>;

pub struct BlockingAdapter<B> {
    backend: Arc<B>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl<B: BlockingBackend> BlockingAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B> Drop for BlockingAdapter<B> {
    fn drop(&mut self) {
        let in_flight = self.in_flight.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (job_id, task) in in_flight.drain() {
            if !task.is_finished() {
                tracing::debug!(job_id = %job_id, "Aborting uncollected blocking call");
                task.abort();
            }
        }
    }
}

#[async_trait]
impl<B: BlockingBackend> JobAdapter for BlockingAdapter<B> {
    type Request = B::Request;

    fn kind(&self) -> JobKind {
        JobKind::Blocking
    }

    async fn submit(&self, request: &Self::Request) -> Result<JobHandle, JobError> {
        let job_id = uuid::Uuid::now_v7().to_string();
        let backend = Arc::clone(&self.backend);
        let request = request.clone();
        let task = tokio::spawn(async move { backend.generate(&request).await });

        let mut in_flight = self.in_flight();
        let before = in_flight.len();
        in_flight.retain(|_, task| !task.is_finished());
        if in_flight.len() < before {
            tracing::debug!(
                pruned = before - in_flight.len(),
                "Dropped finished blocking calls nobody awaited",
            );
        }
        in_flight.insert(job_id.clone(), task);
        Ok(JobHandle::new(job_id, JobKind::Blocking))
    }

    async fn await_result(
        &self,
        handle: &JobHandle,
        timeout: Duration,
    ) -> Result<ArtifactRef, JobError> {
        let task = self.in_flight().remove(&handle.job_id).ok_or_else(|| {
            JobError::ResultUnavailable(format!("No call in flight for job {}", handle.job_id))
        })?;

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(JobError::Request(format!(
                "Generation task aborted: {join_error}"
            ))),
            Err(_) => {
                tracing::warn!(
                    job_id = %handle.job_id,
                    waited_secs = timeout.as_secs(),
                    "Abandoning blocking call",
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
