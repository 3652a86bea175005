//! Shot production: per-shot stage execution and concurrent batches.

pub mod config;
pub mod production;
pub mod report;
pub mod scheduler;
pub mod shot_pipeline;
pub mod stage;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use production::Production;
pub use report::{BatchReport, BatchRun, ShotOutcome};
pub use scheduler::{BatchError, BatchScheduler};
pub use shot_pipeline::ShotPipeline;
pub use stage::{Stage, StageError};
