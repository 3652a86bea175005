//! Recording fake adapter for unit tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mvforge_backends::JobAdapter;
use mvforge_core::error::JobError;
use mvforge_core::job::{ArtifactRef, JobHandle, JobKind};

#[derive(Clone, Copy)]
pub enum Outcome {
    Succeed,
    Fail,
}

/// Answers every request with a fixed outcome, optionally overridden by a
/// per-request failure predicate, and records the requests it saw.
pub struct FakeAdapter<R> {
    outcome: Outcome,
    fail_when: Option<fn(&R) -> bool>,
    delay: Duration,
    requests: Mutex<Vec<R>>,
}

impl<R: Clone + Send + Sync> FakeAdapter<R> {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            fail_when: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_when(predicate: fn(&R) -> bool) -> Self {
        Self {
            fail_when: Some(predicate),
            ..Self::new(Outcome::Succeed)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<R> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> JobAdapter for FakeAdapter<R> {
    type Request = R;

    fn kind(&self) -> JobKind {
        JobKind::Blocking
    }

    async fn submit(&self, request: &R) -> Result<JobHandle, JobError> {
        let fail = match self.fail_when {
            Some(predicate) => predicate(request),
            None => matches!(self.outcome, Outcome::Fail),
        };
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let job_id = if fail {
            "fail".to_string()
        } else {
            format!("job-{}", requests.len())
        };
        Ok(JobHandle::new(job_id, JobKind::Blocking))
    }

    async fn await_result(
        &self,
        handle: &JobHandle,
        _timeout: Duration,
    ) -> Result<ArtifactRef, JobError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if handle.job_id == "fail" {
            return Err(JobError::RemoteFailure("scripted failure".into()));
        }
        Ok(ArtifactRef::new(handle.job_id.clone()).unwrap())
    }

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<PathBuf, JobError> {
        std::fs::write(dest, artifact.as_str()).unwrap();
        Ok(dest.to_path_buf())
    }
}
