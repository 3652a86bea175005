//! Pipeline stages and the error a failed stage reports.

use std::fmt;
use std::str::FromStr;

use mvforge_core::error::JobError;
use mvforge_core::types::ShotId;

/// One step of a shot's pipeline. Also selects what a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Text-to-image for a shot.
    Image,
    /// Edit of the character reference into the shot's first frame.
    FirstFrame,
    Video,
    LipSync,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Image => "image",
            Stage::FirstFrame => "first_frame",
            Stage::Video => "video",
            Stage::LipSync => "lip_sync",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "image" => Ok(Stage::Image),
            "first_frame" => Ok(Stage::FirstFrame),
            "video" => Ok(Stage::Video),
            "lip_sync" => Ok(Stage::LipSync),
            other => Err(format!("Unknown stage: {other:?}")),
        }
    }
}

/// A stage failure, tagged with the shot and stage it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Shot {shot_id} {stage} stage failed: {source}")]
pub struct StageError {
    pub shot_id: ShotId,
    pub stage: Stage,
    #[source]
    pub source: JobError,
}

impl StageError {
    pub fn new(shot_id: ShotId, stage: Stage, source: JobError) -> Self {
        Self {
            shot_id,
            stage,
            source,
        }
    }
}
