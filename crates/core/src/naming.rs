//! Artifact file naming convention.
//!
//! Every generated file is named after the shot (or the character
//! reference) plus a second-resolution timestamp, so regenerating a stage
//! never overwrites an earlier take.
//!
//! ```
//! use chrono::TimeZone;
//! use mvforge_core::naming::{artifact_filename, ArtifactKind};
//!
//! let at = chrono::Utc.with_ymd_and_hms(2025, 9, 28, 2, 23, 54).unwrap();
//! assert_eq!(
//!     artifact_filename(ArtifactKind::Video, Some(7), at),
//!     "shot_7_video_20250928_022354.mp4",
//! );
//! ```

use crate::types::{ShotId, Timestamp};

/// Timestamp layout embedded in file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What kind of artifact a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    CharacterReference,
    Image,
    Video,
    LipSync,
}

impl ArtifactKind {
    fn label(self) -> &'static str {
        match self {
            ArtifactKind::CharacterReference => "character_reference",
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
            ArtifactKind::LipSync => "lipsync",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ArtifactKind::CharacterReference | ArtifactKind::Image => "png",
            ArtifactKind::Video | ArtifactKind::LipSync => "mp4",
        }
    }
}

/// Build the file name for an artifact.
///
/// Convention: `shot_{id}_{kind}_{timestamp}.{ext}`, or
/// `character_reference_{timestamp}.png` when no shot is given.
pub fn artifact_filename(kind: ArtifactKind, shot_id: Option<ShotId>, at: Timestamp) -> String {
    let stamp = at.format(TIMESTAMP_FORMAT);
    match shot_id {
        Some(id) => format!("shot_{id}_{}_{stamp}.{}", kind.label(), kind.extension()),
        None => format!("{}_{stamp}.{}", kind.label(), kind.extension()),
    }
}
