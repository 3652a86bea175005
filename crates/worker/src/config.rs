use std::path::PathBuf;

use mvforge_core::config::{process_env, string_or};
use mvforge_core::error::CoreError;
use mvforge_pipeline::Stage;

pub const DEFAULT_STORYBOARD_PATH: &str = "shots.json";
pub const DEFAULT_STAGES: &str = "reference,first_frame,video";

/// One step of a worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Generate the character reference image.
    Reference,
    /// Run a stage over every shot.
    Batch(Stage),
}

/// Worker run settings.
///
/// | Variable               | Default                       |
/// |------------------------|-------------------------------|
/// | `STORYBOARD_PATH`      | `shots.json`                  |
/// | `BATCH_STAGE`          | `reference,first_frame,video` |
/// | `REFERENCE_IMAGE_PATH` | (none)                        |
/// | `LIPSYNC_AUDIO_PATH`   | (required for `lip_sync`)     |
///
/// `BATCH_STAGE` is a comma-separated list run in order within one
/// process, so later stages see the artifacts earlier ones wrote.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub storyboard_path: PathBuf,
    pub steps: Vec<Step>,
    /// Existing reference image, used instead of generating one.
    pub reference_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let steps = parse_steps(&string_or(&lookup, "BATCH_STAGE", DEFAULT_STAGES))?;
        let optional_path = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        let audio_path = optional_path("LIPSYNC_AUDIO_PATH");

        if steps.contains(&Step::Batch(Stage::LipSync)) && audio_path.is_none() {
            return Err(CoreError::Config(
                "LIPSYNC_AUDIO_PATH must be set to run lip_sync".to_string(),
            ));
        }

        Ok(Self {
            storyboard_path: string_or(&lookup, "STORYBOARD_PATH", DEFAULT_STORYBOARD_PATH).into(),
            steps,
            reference_path: optional_path("REFERENCE_IMAGE_PATH"),
            audio_path,
        })
    }

    pub fn needs_lip_sync(&self) -> bool {
        self.steps.contains(&Step::Batch(Stage::LipSync))
    }
}

fn parse_steps(value: &str) -> Result<Vec<Step>, CoreError> {
    let steps = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s {
            "reference" => Ok(Step::Reference),
            other => other
                .parse::<Stage>()
                .map(Step::Batch)
                .map_err(|e| CoreError::Config(format!("BATCH_STAGE: {e}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if steps.is_empty() {
        return Err(CoreError::Config("BATCH_STAGE names no stage".to_string()));
    }
    Ok(steps)
}
