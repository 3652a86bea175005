//! Concurrent batch execution of one stage across many shots.
//!
//! Every eligible shot gets its own task; a semaphore caps how many run a
//! stage at once. Each task owns its shot until it finishes, so artifact
//! slots are only ever written by one worker. Results are keyed by shot id
//! as they arrive. A failing shot never cancels or delays the others, and
//! the report is returned only once every task has resolved.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use mvforge_core::error::JobError;
use mvforge_core::shot::Shot;
use mvforge_core::types::ShotId;

use crate::report::{BatchReport, BatchRun, ShotOutcome};
use crate::shot_pipeline::ShotPipeline;
use crate::stage::{Stage, StageError};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("No shot is eligible for the {0} stage")]
    NoEligibleShots(Stage),

    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("The first_frame stage needs a character reference image")]
    MissingReference,

    #[error("The {stage} stage is unavailable: {reason}")]
    StageUnavailable { stage: Stage, reason: String },
}

/// Batch-wide inputs a stage may need besides the shot itself.
#[derive(Debug, Clone, Default)]
struct BatchInputs {
    reference: Option<PathBuf>,
    audio: Option<PathBuf>,
    video_prompts: HashMap<ShotId, String>,
}

pub struct BatchScheduler {
    pipeline: Arc<ShotPipeline>,
    inputs: Arc<BatchInputs>,
}

impl BatchScheduler {
    pub fn new(pipeline: Arc<ShotPipeline>) -> Self {
        Self {
            pipeline,
            inputs: Arc::new(BatchInputs::default()),
        }
    }

    /// Character reference edited by the first-frame stage.
    pub fn with_reference(mut self, path: impl Into<PathBuf>) -> Self {
        Arc::make_mut(&mut self.inputs).reference = Some(path.into());
        self
    }

    /// Audio track for the lip-sync stage.
    pub fn with_audio(mut self, path: impl Into<PathBuf>) -> Self {
        Arc::make_mut(&mut self.inputs).audio = Some(path.into());
        self
    }

    /// Saved video prompts; shots without one use their default.
    pub fn with_video_prompts(mut self, prompts: HashMap<ShotId, String>) -> Self {
        Arc::make_mut(&mut self.inputs).video_prompts = prompts;
        self
    }

    fn check_ready(&self, stage: Stage) -> Result<(), BatchError> {
        match stage {
            Stage::FirstFrame if self.inputs.reference.is_none() => {
                Err(BatchError::MissingReference)
            }
            Stage::LipSync if !self.pipeline.has_lip_sync() => Err(BatchError::StageUnavailable {
                stage,
                reason: "no lip-sync backend configured".to_string(),
            }),
            Stage::LipSync if self.inputs.audio.is_none() => Err(BatchError::StageUnavailable {
                stage,
                reason: "no audio track given".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Run `stage` for every eligible shot with at most `concurrency_limit`
    /// stages in flight.
    ///
    /// Only configuration problems are errors. Individual shot failures
    /// land in the report.
    pub async fn run_batch(
        &self,
        shots: Vec<Shot>,
        stage: Stage,
        concurrency_limit: usize,
    ) -> Result<BatchRun, BatchError> {
        if concurrency_limit == 0 {
            return Err(BatchError::InvalidConcurrency);
        }
        self.check_ready(stage)?;

        let mut report = BatchReport::new(stage);
        let eligible: Vec<bool> = shots
            .iter()
            .map(|shot| match skip_reason(stage, shot) {
                Some(reason) => {
                    report.record(shot.id, ShotOutcome::Skipped { reason });
                    false
                }
                None => true,
            })
            .collect();
        if !eligible.contains(&true) {
            return Err(BatchError::NoEligibleShots(stage));
        }

        tracing::info!(
            stage = stage.label(),
            shots = shots.len(),
            eligible = eligible.iter().filter(|e| **e).count(),
            concurrency_limit,
            "Batch started",
        );

        let semaphore = Arc::new(Semaphore::new(concurrency_limit));
        let mut slots: Vec<Option<Shot>> = Vec::with_capacity(shots.len());
        let mut originals: HashMap<usize, Shot> = HashMap::new();
        let mut running = FuturesUnordered::new();

        for (index, (shot, eligible)) in shots.into_iter().zip(eligible).enumerate() {
            if !eligible {
                slots.push(Some(shot));
                continue;
            }
            slots.push(None);
            originals.insert(index, shot.clone());

            let pipeline = Arc::clone(&self.pipeline);
            let inputs = Arc::clone(&self.inputs);
            let semaphore = Arc::clone(&semaphore);
            let shot_id = shot.id;
            let handle = tokio::spawn(async move {
                let mut shot = shot;
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let result = run_stage(&pipeline, &inputs, &mut shot, stage).await;
                (shot, result)
            });
            running.push(async move { (index, shot_id, handle.await) });
        }

        while let Some((index, shot_id, joined)) = running.next().await {
            match joined {
                Ok((shot, result)) => {
                    let outcome = match result {
                        Ok(path) => {
                            tracing::info!(
                                shot_id,
                                stage = stage.label(),
                                path = %path.display(),
                                "Shot stage succeeded",
                            );
                            ShotOutcome::Succeeded { path }
                        }
                        Err(err) => ShotOutcome::Failed(err),
                    };
                    report.record(shot_id, outcome);
                    slots[index] = Some(shot);
                }
                Err(join_error) => {
                    tracing::error!(
                        shot_id,
                        stage = stage.label(),
                        error = %join_error,
                        "Shot worker aborted",
                    );
                    report.record(
                        shot_id,
                        ShotOutcome::Aborted {
                            message: join_error.to_string(),
                        },
                    );
                    slots[index] = originals.remove(&index);
                }
            }
        }

        tracing::info!(
            stage = stage.label(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Batch finished",
        );

        Ok(BatchRun {
            report,
            shots: slots.into_iter().flatten().collect(),
        })
    }
}

/// Why a shot does not take part in a stage, if it doesn't.
fn skip_reason(stage: Stage, shot: &Shot) -> Option<String> {
    match stage {
        Stage::FirstFrame if !shot.character_in_scene => Some("no character in scene".to_string()),
        Stage::LipSync if !shot.sing => Some("shot is not sung".to_string()),
        _ => None,
    }
}

async fn run_stage(
    pipeline: &ShotPipeline,
    inputs: &BatchInputs,
    shot: &mut Shot,
    stage: Stage,
) -> Result<PathBuf, StageError> {
    let shot_id = shot.id;
    let missing = move |missing: &'static str| -> Result<PathBuf, StageError> {
        Err(StageError::new(
            shot_id,
            stage,
            JobError::DependencyUnmet {
                stage: stage.label(),
                missing,
            },
        ))
    };

    match stage {
        Stage::Image => pipeline.generate_image(shot, None).await,
        Stage::FirstFrame => match &inputs.reference {
            Some(reference) => pipeline.generate_first_frame(shot, reference, None).await,
            None => missing("character reference"),
        },
        Stage::Video => {
            let prompt = inputs.video_prompts.get(&shot.id).map(String::as_str);
            pipeline.generate_video(shot, prompt).await
        }
        Stage::LipSync => match &inputs.audio {
            Some(audio) => pipeline.lip_sync(shot, audio, None).await,
            None => missing("audio track"),
        },
    }
}
