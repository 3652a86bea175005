//! Storyboard file loading.
//!
//! A storyboard is a JSON document describing the character and every
//! shot of a production:
//!
//! ```json
//! {
//!   "character_description": "a young singer in a red jacket",
//!   "shots": [
//!     { "id": 1, "lyric": "...", "stable": "...", "dynamic": "...",
//!       "duration": 6, "sing": true, "character": true,
//!       "start_time": "0:00", "end_time": "0:04" }
//!   ]
//! }
//! ```
//!
//! Only `id` is required per shot.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;
use crate::shot::{Shot, TrimMarkers, DEFAULT_DURATION_SECS, DEFAULT_TRIM_MARKER};
use crate::types::ShotId;

/// A parsed, validated storyboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Storyboard {
    pub character_description: String,
    pub shots: Vec<Shot>,
}

#[derive(Debug, Deserialize)]
struct StoryboardFile {
    #[serde(default)]
    character_description: String,
    #[serde(default)]
    shots: Vec<ShotEntry>,
}

#[derive(Debug, Deserialize)]
struct ShotEntry {
    id: ShotId,
    #[serde(default)]
    lyric: String,
    #[serde(default)]
    stable: String,
    #[serde(default)]
    dynamic: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    sing: bool,
    #[serde(default)]
    character: bool,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

impl From<ShotEntry> for Shot {
    fn from(entry: ShotEntry) -> Self {
        // Fractional durations round up so 6.5s still counts as long-form.
        let duration = entry
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.ceil() as u32)
            .unwrap_or(DEFAULT_DURATION_SECS);

        let trim = TrimMarkers::new(
            entry
                .start_time
                .unwrap_or_else(|| DEFAULT_TRIM_MARKER.to_string()),
            entry
                .end_time
                .unwrap_or_else(|| DEFAULT_TRIM_MARKER.to_string()),
        );

        let mut shot = Shot::new(entry.id, entry.stable, entry.dynamic)
            .with_duration(duration)
            .with_character(entry.character)
            .with_trim(trim);
        shot.lyric = entry.lyric;
        shot.sing = entry.sing;
        shot
    }
}

/// Parse a storyboard from JSON text.
pub fn parse_storyboard(json: &str) -> Result<Storyboard, CoreError> {
    let file: StoryboardFile = serde_json::from_str(json)?;

    let mut seen = HashSet::new();
    for entry in &file.shots {
        if !seen.insert(entry.id) {
            return Err(CoreError::Validation(format!(
                "Duplicate shot id {} in storyboard",
                entry.id
            )));
        }
    }

    Ok(Storyboard {
        character_description: file.character_description,
        shots: file.shots.into_iter().map(Shot::from).collect(),
    })
}

/// Read and parse a storyboard file.
pub fn load_storyboard(path: &Path) -> Result<Storyboard, CoreError> {
    let text = std::fs::read_to_string(path)?;
    parse_storyboard(&text)
}
