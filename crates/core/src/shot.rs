//! Shots: the unit of work in a batch.
//!
//! A shot carries its prompts, target duration and the artifact paths
//! produced by each pipeline stage. Artifact slots start empty and are
//! filled only by the stage that produces them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ShotId;

// ---------------------------------------------------------------------------
// Duration normalization
// ---------------------------------------------------------------------------

/// Requests at or below this many seconds produce a short-form clip.
pub const SHORT_FORM_THRESHOLD_SECS: u32 = 6;

/// Clip length the video backend produces for short-form requests.
pub const SHORT_FORM_SECS: u32 = 6;

/// Clip length the video backend produces for everything longer.
pub const LONG_FORM_SECS: u32 = 10;

/// Duration assumed when a shot does not specify one.
pub const DEFAULT_DURATION_SECS: u32 = 6;

/// Coerce a requested duration onto the two lengths the video backend
/// accepts. Idempotent: normalizing a normalized value returns it unchanged.
pub fn normalize_duration(requested_secs: u32) -> u32 {
    if requested_secs <= SHORT_FORM_THRESHOLD_SECS {
        SHORT_FORM_SECS
    } else {
        LONG_FORM_SECS
    }
}

// ---------------------------------------------------------------------------
// Trim markers
// ---------------------------------------------------------------------------

/// Default trim marker, `minutes:seconds`.
pub const DEFAULT_TRIM_MARKER: &str = "0:00";

/// Start/end markers selecting the audio window used for lip-sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimMarkers {
    pub start_time: String,
    pub end_time: String,
}

impl Default for TrimMarkers {
    fn default() -> Self {
        Self {
            start_time: DEFAULT_TRIM_MARKER.to_string(),
            end_time: DEFAULT_TRIM_MARKER.to_string(),
        }
    }
}

impl TrimMarkers {
    pub fn new(start_time: impl Into<String>, end_time: impl Into<String>) -> Self {
        Self {
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shot
// ---------------------------------------------------------------------------

/// Which conditioning the video stage runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    /// Prompt only; stable and dynamic prompts are concatenated.
    TextOnly,
    /// First-frame image plus the dynamic prompt. Requires `image_path`.
    ImageConditioned,
}

/// One work unit of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: ShotId,
    /// Lyric line the shot illustrates. Informational only.
    #[serde(default)]
    pub lyric: String,
    /// Scene description that stays constant for the shot.
    pub stable_prompt: String,
    /// Motion/action description.
    pub dynamic_prompt: String,
    /// Requested length in seconds, before normalization.
    pub duration: u32,
    /// Whether the character sings in this shot.
    #[serde(default)]
    pub sing: bool,
    /// Selects the image-conditioned path through the pipeline.
    pub character_in_scene: bool,
    #[serde(default)]
    pub trim: TrimMarkers,

    /// First-frame image, set by the image stage.
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    /// Generated clip, set by the video stage.
    #[serde(default)]
    pub video_path: Option<PathBuf>,
    /// Lip-synced clip, set by the lip-sync stage.
    #[serde(default)]
    pub lip_sync_path: Option<PathBuf>,
}

impl Shot {
    pub fn new(
        id: ShotId,
        stable_prompt: impl Into<String>,
        dynamic_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            lyric: String::new(),
            stable_prompt: stable_prompt.into(),
            dynamic_prompt: dynamic_prompt.into(),
            duration: DEFAULT_DURATION_SECS,
            sing: false,
            character_in_scene: false,
            trim: TrimMarkers::default(),
            image_path: None,
            video_path: None,
            lip_sync_path: None,
        }
    }

    pub fn with_character(mut self, character_in_scene: bool) -> Self {
        self.character_in_scene = character_in_scene;
        self
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_trim(mut self, trim: TrimMarkers) -> Self {
        self.trim = trim;
        self
    }

    pub fn video_mode(&self) -> VideoMode {
        if self.character_in_scene {
            VideoMode::ImageConditioned
        } else {
            VideoMode::TextOnly
        }
    }

    /// Video prompt used when no override is given.
    ///
    /// Image-conditioned shots already show the scene in their first frame,
    /// so only the dynamic prompt is sent.
    pub fn default_video_prompt(&self) -> String {
        match self.video_mode() {
            VideoMode::ImageConditioned => self.dynamic_prompt.clone(),
            VideoMode::TextOnly => format!("{}, {}", self.stable_prompt, self.dynamic_prompt),
        }
    }

    /// Normalized clip length for this shot.
    pub fn normalized_duration(&self) -> u32 {
        normalize_duration(self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_inputs_normalize_to_short_form() {
        for d in [0, 1, 3, 6] {
            assert_eq!(normalize_duration(d), SHORT_FORM_SECS, "input {d}");
        }
    }

    #[test]
    fn long_inputs_normalize_to_long_form() {
        for d in [7, 10, 20, 600] {
            assert_eq!(normalize_duration(d), LONG_FORM_SECS, "input {d}");
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        for d in 0..=30 {
            let once = normalize_duration(d);
            assert_eq!(normalize_duration(once), once);
        }
    }

    #[test]
    fn text_only_prompt_concatenates() {
        let shot = Shot::new(1, "a beach at dusk", "waves roll in");
        assert_eq!(shot.video_mode(), VideoMode::TextOnly);
        assert_eq!(shot.default_video_prompt(), "a beach at dusk, waves roll in");
    }

    #[test]
    fn character_prompt_uses_dynamic_only() {
        let shot = Shot::new(2, "girl in red", "turns and smiles").with_character(true);
        assert_eq!(shot.video_mode(), VideoMode::ImageConditioned);
        assert_eq!(shot.default_video_prompt(), "turns and smiles");
    }

    #[test]
    fn new_shot_has_no_artifacts() {
        let shot = Shot::new(3, "s", "d");
        assert!(shot.image_path.is_none());
        assert!(shot.video_path.is_none());
        assert!(shot.lip_sync_path.is_none());
        assert_eq!(shot.trim, TrimMarkers::default());
    }
}
