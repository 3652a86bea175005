//! Batch outcomes, keyed by shot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use mvforge_core::shot::Shot;
use mvforge_core::types::ShotId;

use crate::stage::{Stage, StageError};

/// What happened to one shot in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ShotOutcome {
    Succeeded { path: PathBuf },
    Failed(StageError),
    /// Not eligible for the stage; no work was submitted.
    Skipped { reason: String },
    /// The worker running the shot died before reporting.
    Aborted { message: String },
}

impl ShotOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ShotOutcome::Succeeded { .. })
    }
}

/// Per-shot results of one batch. Iteration is in shot id order,
/// regardless of the order workers finished in.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub stage: Stage,
    outcomes: BTreeMap<ShotId, ShotOutcome>,
}

impl BatchReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, shot_id: ShotId, outcome: ShotOutcome) {
        self.outcomes.insert(shot_id, outcome);
    }

    pub fn get(&self, shot_id: ShotId) -> Option<&ShotOutcome> {
        self.outcomes.get(&shot_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShotId, &ShotOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ShotOutcome::Succeeded { .. }))
    }

    /// Failed or aborted shots.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ShotOutcome::Failed(_) | ShotOutcome::Aborted { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ShotOutcome::Skipped { .. }))
    }

    fn count(&self, predicate: impl Fn(&ShotOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| predicate(o)).count()
    }

    /// One human-readable status line per shot.
    pub fn lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|(id, outcome)| match outcome {
                ShotOutcome::Succeeded { path } => {
                    format!("Shot {id}: {} ok -> {}", self.stage, path.display())
                }
                ShotOutcome::Failed(err) => {
                    format!("Shot {id}: {} failed ({}): {}", self.stage, err.source.kind(), err.source)
                }
                ShotOutcome::Skipped { reason } => format!("Shot {id}: skipped ({reason})"),
                ShotOutcome::Aborted { message } => format!("Shot {id}: aborted: {message}"),
            })
            .collect()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} batch: {} succeeded, {} failed, {} skipped",
            self.stage,
            self.succeeded(),
            self.failed(),
            self.skipped()
        )?;
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// A finished batch: the report plus every shot in submission order,
/// carrying whatever artifact paths the batch wrote.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub report: BatchReport,
    pub shots: Vec<Shot>,
}

#[cfg(test)]
mod tests {
    use mvforge_core::error::JobError;

    use super::*;

    #[test]
    fn outcomes_iterate_by_shot_id() {
        let mut report = BatchReport::new(Stage::Video);
        report.record(3, ShotOutcome::Succeeded { path: "c.mp4".into() });
        report.record(1, ShotOutcome::Skipped { reason: "no character".into() });
        report.record(
            2,
            ShotOutcome::Failed(StageError::new(
                2,
                Stage::Video,
                JobError::RemoteFailure("nsfw".into()),
            )),
        );

        let ids: Vec<ShotId> = report.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(
            (report.succeeded(), report.failed(), report.skipped()),
            (1, 1, 1)
        );
    }

    #[test]
    fn lines_describe_each_shot() {
        let mut report = BatchReport::new(Stage::FirstFrame);
        report.record(1, ShotOutcome::Succeeded { path: "out/a.png".into() });
        report.record(2, ShotOutcome::Skipped { reason: "no character in scene".into() });
        report.record(
            3,
            ShotOutcome::Failed(StageError::new(
                3,
                Stage::FirstFrame,
                JobError::TimedOut {
                    job_id: "j".into(),
                    waited: std::time::Duration::from_secs(300),
                },
            )),
        );

        assert_eq!(
            report.lines(),
            vec![
                "Shot 1: first_frame ok -> out/a.png".to_string(),
                "Shot 2: skipped (no character in scene)".to_string(),
                "Shot 3: first_frame failed (timed_out): Timed out after 300s waiting for job j"
                    .to_string(),
            ]
        );
        assert!(report
            .to_string()
            .starts_with("first_frame batch: 1 succeeded, 1 failed, 1 skipped\n"));
    }
}
