//! Domain types shared by every layer of the shot production pipeline.
//!
//! Pure data and functions only: shots and their artifact slots, job
//! state and progress, the job error taxonomy, storyboard loading,
//! artifact naming and environment-config helpers.

pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod naming;
pub mod shot;
pub mod storyboard;
pub mod types;
