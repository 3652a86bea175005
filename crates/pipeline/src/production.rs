//! A production: the storyboard's shots, the character reference and the
//! per-shot video prompt book.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mvforge_core::error::CoreError;
use mvforge_core::shot::Shot;
use mvforge_core::storyboard::{load_storyboard, Storyboard};
use mvforge_core::types::ShotId;

#[derive(Debug, Clone)]
pub struct Production {
    character_description: String,
    shots: Vec<Shot>,
    /// Saved video prompts. Shots without an entry use their default.
    saved_prompts: HashMap<ShotId, String>,
    reference_path: Option<PathBuf>,
}

impl Production {
    /// Load a production from a storyboard file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let storyboard = load_storyboard(path)?;
        tracing::info!(
            path = %path.display(),
            shots = storyboard.shots.len(),
            "Storyboard loaded",
        );
        Ok(Self::from_storyboard(storyboard))
    }

    pub fn from_storyboard(storyboard: Storyboard) -> Self {
        Self {
            character_description: storyboard.character_description,
            shots: storyboard.shots,
            saved_prompts: HashMap::new(),
            reference_path: None,
        }
    }

    pub fn character_description(&self) -> &str {
        &self.character_description
    }

    pub fn shots(&self) -> &[Shot] {
        &self.shots
    }

    pub fn shot(&self, id: ShotId) -> Result<&Shot, CoreError> {
        self.shots
            .iter()
            .find(|s| s.id == id)
            .ok_or(CoreError::NotFound { entity: "Shot", id })
    }

    pub fn shot_mut(&mut self, id: ShotId) -> Result<&mut Shot, CoreError> {
        self.shots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(CoreError::NotFound { entity: "Shot", id })
    }

    /// Write back shots returned by a batch run, matched by id.
    pub fn update_shots(&mut self, shots: impl IntoIterator<Item = Shot>) {
        for updated in shots {
            if let Some(slot) = self.shots.iter_mut().find(|s| s.id == updated.id) {
                *slot = updated;
            }
        }
    }

    pub fn reference_path(&self) -> Option<&Path> {
        self.reference_path.as_deref()
    }

    pub fn set_reference_path(&mut self, path: impl Into<PathBuf>) {
        self.reference_path = Some(path.into());
    }

    // -----------------------------------------------------------------------
    // Prompt book
    // -----------------------------------------------------------------------

    /// The prompt the video stage will use for a shot.
    pub fn video_prompt(&self, id: ShotId) -> Result<String, CoreError> {
        let shot = self.shot(id)?;
        Ok(self
            .saved_prompts
            .get(&id)
            .cloned()
            .unwrap_or_else(|| shot.default_video_prompt()))
    }

    /// Save an edited video prompt for a shot.
    pub fn save_video_prompt(&mut self, id: ShotId, prompt: &str) -> Result<(), CoreError> {
        self.shot(id)?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(CoreError::Validation(format!(
                "Video prompt for shot {id} must not be empty"
            )));
        }
        self.saved_prompts.insert(id, prompt.to_string());
        Ok(())
    }

    /// Drop a saved prompt, returning the default that now applies.
    pub fn restore_video_prompt(&mut self, id: ShotId) -> Result<String, CoreError> {
        let default = self.shot(id)?.default_video_prompt();
        self.saved_prompts.remove(&id);
        Ok(default)
    }

    /// Effective video prompt of every shot.
    pub fn video_prompts(&self) -> HashMap<ShotId, String> {
        self.shots
            .iter()
            .map(|shot| {
                let prompt = self
                    .saved_prompts
                    .get(&shot.id)
                    .cloned()
                    .unwrap_or_else(|| shot.default_video_prompt());
                (shot.id, prompt)
            })
            .collect()
    }
}
