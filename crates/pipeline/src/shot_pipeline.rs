//! Per-shot stage execution.
//!
//! Stages run strictly in dependency order: first frame, then video, then
//! (on request) lip-sync. Each stage checks that its input artifact exists
//! before touching a backend, and writes its own artifact slot only on
//! success. A failure never clears a slot an earlier stage filled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mvforge_backends::{ImageRequest, JobAdapter, LipSyncRequest, VideoRequest};
use mvforge_core::error::JobError;
use mvforge_core::naming::{artifact_filename, ArtifactKind};
use mvforge_core::shot::{Shot, TrimMarkers, VideoMode};
use mvforge_core::types::ShotId;

use crate::config::PipelineConfig;
use crate::stage::{Stage, StageError};

pub type ImageBackend = Arc<dyn JobAdapter<Request = ImageRequest>>;
pub type VideoBackend = Arc<dyn JobAdapter<Request = VideoRequest>>;
pub type LipSyncBackend = Arc<dyn JobAdapter<Request = LipSyncRequest>>;

pub struct ShotPipeline {
    images: ImageBackend,
    videos: VideoBackend,
    lip_sync: Option<LipSyncBackend>,
    config: PipelineConfig,
}

impl ShotPipeline {
    pub fn new(images: ImageBackend, videos: VideoBackend, config: PipelineConfig) -> Self {
        Self {
            images,
            videos,
            lip_sync: None,
            config,
        }
    }

    /// Enable the lip-sync stage.
    pub fn with_lip_sync(mut self, lip_sync: LipSyncBackend) -> Self {
        self.lip_sync = Some(lip_sync);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn has_lip_sync(&self) -> bool {
        self.lip_sync.is_some()
    }

    fn destination(&self, kind: ArtifactKind, shot_id: Option<ShotId>) -> PathBuf {
        self.config
            .output_dir
            .join(artifact_filename(kind, shot_id, chrono::Utc::now()))
    }

    /// Generate the character reference image from its description.
    pub async fn generate_reference(&self, description: &str) -> Result<PathBuf, JobError> {
        let dest = self.destination(ArtifactKind::CharacterReference, None);
        let path = self
            .images
            .run(
                &ImageRequest::text(description),
                self.config.image_timeout,
                &dest,
            )
            .await?;
        tracing::info!(path = %path.display(), "Character reference generated");
        Ok(path)
    }

    /// Text-to-image for a shot. The prompt defaults to the stable prompt.
    pub async fn generate_image(
        &self,
        shot: &mut Shot,
        prompt: Option<&str>,
    ) -> Result<PathBuf, StageError> {
        let prompt = prompt.unwrap_or(shot.stable_prompt.as_str());
        let request = ImageRequest::text(prompt);
        let dest = self.destination(ArtifactKind::Image, Some(shot.id));

        let path = self
            .images
            .run(&request, self.config.image_timeout, &dest)
            .await
            .map_err(|e| stage_failed(shot.id, Stage::Image, e))?;
        shot.image_path = Some(path.clone());
        Ok(path)
    }

    /// Edit the character reference into the shot's first frame.
    pub async fn generate_first_frame(
        &self,
        shot: &mut Shot,
        reference: &Path,
        prompt: Option<&str>,
    ) -> Result<PathBuf, StageError> {
        let prompt = prompt.unwrap_or(shot.stable_prompt.as_str());
        let request = ImageRequest::edit(prompt, reference);
        let dest = self.destination(ArtifactKind::Image, Some(shot.id));

        let path = self
            .images
            .run(&request, self.config.image_timeout, &dest)
            .await
            .map_err(|e| stage_failed(shot.id, Stage::FirstFrame, e))?;
        shot.image_path = Some(path.clone());
        tracing::info!(shot_id = shot.id, path = %path.display(), "First frame generated");
        Ok(path)
    }

    /// Generate the shot's clip.
    ///
    /// Character shots are conditioned on `image_path` and fail with
    /// [`JobError::DependencyUnmet`] when it is unset. Other shots run
    /// text-only and never look at `image_path`.
    pub async fn generate_video(
        &self,
        shot: &mut Shot,
        prompt: Option<&str>,
    ) -> Result<PathBuf, StageError> {
        let prompt = prompt
            .map(str::to_string)
            .unwrap_or_else(|| shot.default_video_prompt());

        let request = match shot.video_mode() {
            VideoMode::ImageConditioned => {
                let Some(first_frame) = &shot.image_path else {
                    return Err(stage_failed(
                        shot.id,
                        Stage::Video,
                        JobError::DependencyUnmet {
                            stage: "video",
                            missing: "image_path",
                        },
                    ));
                };
                VideoRequest::image_conditioned(prompt, first_frame, shot.duration)
            }
            VideoMode::TextOnly => VideoRequest::text_only(prompt, shot.duration),
        };
        let dest = self.destination(ArtifactKind::Video, Some(shot.id));

        let path = self
            .videos
            .run(&request, self.config.video_timeout, &dest)
            .await
            .map_err(|e| stage_failed(shot.id, Stage::Video, e))?;
        shot.video_path = Some(path.clone());
        Ok(path)
    }

    /// Lip-sync the shot's clip to `audio`, using the shot's own trim
    /// markers unless `trim` overrides them.
    pub async fn lip_sync(
        &self,
        shot: &mut Shot,
        audio: &Path,
        trim: Option<TrimMarkers>,
    ) -> Result<PathBuf, StageError> {
        let Some(backend) = &self.lip_sync else {
            return Err(stage_failed(
                shot.id,
                Stage::LipSync,
                JobError::DependencyUnmet {
                    stage: "lip_sync",
                    missing: "lip-sync backend",
                },
            ));
        };
        let Some(video) = &shot.video_path else {
            return Err(stage_failed(
                shot.id,
                Stage::LipSync,
                JobError::DependencyUnmet {
                    stage: "lip_sync",
                    missing: "video_path",
                },
            ));
        };

        let request = LipSyncRequest {
            video: video.clone(),
            audio: audio.to_path_buf(),
            trim: trim.unwrap_or_else(|| shot.trim.clone()),
            positive_prompt: None,
            negative_prompt: None,
        };
        let dest = self.destination(ArtifactKind::LipSync, Some(shot.id));

        let path = backend
            .run(&request, self.config.lip_sync_timeout, &dest)
            .await
            .map_err(|e| stage_failed(shot.id, Stage::LipSync, e))?;
        shot.lip_sync_path = Some(path.clone());
        Ok(path)
    }
}

fn stage_failed(shot_id: ShotId, stage: Stage, source: JobError) -> StageError {
    tracing::error!(shot_id, stage = stage.label(), error = %source, "Stage failed");
    StageError::new(shot_id, stage, source)
}
