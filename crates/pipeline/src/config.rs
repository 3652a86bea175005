use std::path::PathBuf;
use std::time::Duration;

use mvforge_core::config::{parse_or, process_env, string_or};
use mvforge_core::error::CoreError;

pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_CONCURRENCY: usize = 20;
pub const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_VIDEO_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_LIPSYNC_TIMEOUT_SECS: u64 = 3600;

/// Pipeline settings.
///
/// | Variable               | Default  |
/// |------------------------|----------|
/// | `OUTPUT_DIR`           | `output` |
/// | `BATCH_CONCURRENCY`    | `20`     |
/// | `IMAGE_TIMEOUT_SECS`   | `300`    |
/// | `VIDEO_TIMEOUT_SECS`   | `1800`   |
/// | `LIPSYNC_TIMEOUT_SECS` | `3600`   |
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Every artifact is written here.
    pub output_dir: PathBuf,
    /// Worker budget for batch runs.
    pub concurrency: usize,
    pub image_timeout: Duration,
    pub video_timeout: Duration,
    pub lip_sync_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            concurrency: DEFAULT_CONCURRENCY,
            image_timeout: Duration::from_secs(DEFAULT_IMAGE_TIMEOUT_SECS),
            video_timeout: Duration::from_secs(DEFAULT_VIDEO_TIMEOUT_SECS),
            lip_sync_timeout: Duration::from_secs(DEFAULT_LIPSYNC_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let concurrency = parse_or(&lookup, "BATCH_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(CoreError::Config(
                "BATCH_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let secs = |key: &str, default: u64| -> Result<Duration, CoreError> {
            parse_or(&lookup, key, default).map(Duration::from_secs)
        };

        Ok(Self {
            output_dir: string_or(&lookup, "OUTPUT_DIR", DEFAULT_OUTPUT_DIR).into(),
            concurrency,
            image_timeout: secs("IMAGE_TIMEOUT_SECS", DEFAULT_IMAGE_TIMEOUT_SECS)?,
            video_timeout: secs("VIDEO_TIMEOUT_SECS", DEFAULT_VIDEO_TIMEOUT_SECS)?,
            lip_sync_timeout: secs("LIPSYNC_TIMEOUT_SECS", DEFAULT_LIPSYNC_TIMEOUT_SECS)?,
        })
    }
}
