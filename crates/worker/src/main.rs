use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvforge_backends::{
    HailuoAdapter, HailuoConfig, LipSyncAdapter, LipSyncConfig, SeedreamAdapter, SeedreamConfig,
};
use mvforge_comfyui::events::ListenerEvent;
use mvforge_comfyui::{ComfyUIConfig, ComfyUISession};
use mvforge_pipeline::{BatchScheduler, PipelineConfig, Production, ShotPipeline};

mod config;

use config::{Step, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mvforge_worker=info,mvforge_pipeline=info,mvforge_backends=info,mvforge_comfyui=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let worker = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let pipeline_config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let concurrency = pipeline_config.concurrency;
    tracing::info!(
        storyboard = %worker.storyboard_path.display(),
        steps = ?worker.steps,
        output_dir = %pipeline_config.output_dir.display(),
        concurrency,
        "Loaded worker configuration",
    );

    let mut production =
        Production::load(&worker.storyboard_path).context("Failed to load storyboard")?;
    if let Some(reference) = &worker.reference_path {
        production.set_reference_path(reference);
    }

    // --- Backends ---
    let images = SeedreamAdapter::from_config(SeedreamConfig::from_env()?);
    let videos = HailuoAdapter::from_config(HailuoConfig::from_env()?);
    let mut pipeline = ShotPipeline::new(Arc::new(images), Arc::new(videos), pipeline_config);

    // --- ComfyUI session (lip-sync only) ---
    let session = if worker.needs_lip_sync() {
        let session = ComfyUISession::start(&ComfyUIConfig::from_env()?)
            .await
            .context("Failed to connect to ComfyUI")?;
        tracing::info!(client_id = %session.client_id(), "ComfyUI session started");
        tokio::spawn(log_listener_events(session.subscribe()));

        let lip_sync = LipSyncAdapter::from_config(Arc::clone(&session), &LipSyncConfig::from_env())
            .await
            .context("Failed to load lip-sync workflow")?;
        pipeline = pipeline.with_lip_sync(Arc::new(lip_sync));
        Some(session)
    } else {
        None
    };
    let pipeline = Arc::new(pipeline);

    // --- Run ---
    let result = run_steps(&worker, &mut production, &pipeline, concurrency).await;

    if let Some(session) = session {
        session.shutdown().await;
    }
    result
}

async fn run_steps(
    worker: &WorkerConfig,
    production: &mut Production,
    pipeline: &Arc<ShotPipeline>,
    concurrency: usize,
) -> anyhow::Result<()> {
    for step in &worker.steps {
        match *step {
            Step::Reference => {
                let path = pipeline
                    .generate_reference(production.character_description())
                    .await
                    .context("Character reference generation failed")?;
                production.set_reference_path(path);
            }
            Step::Batch(stage) => {
                let mut scheduler = BatchScheduler::new(Arc::clone(pipeline))
                    .with_video_prompts(production.video_prompts());
                if let Some(reference) = production.reference_path() {
                    scheduler = scheduler.with_reference(reference);
                }
                if let Some(audio) = &worker.audio_path {
                    scheduler = scheduler.with_audio(audio);
                }

                let run = scheduler
                    .run_batch(production.shots().to_vec(), stage, concurrency)
                    .await
                    .with_context(|| format!("{stage} batch could not run"))?;

                for line in run.report.lines() {
                    tracing::info!("{line}");
                }
                tracing::info!(
                    stage = stage.label(),
                    succeeded = run.report.succeeded(),
                    failed = run.report.failed(),
                    skipped = run.report.skipped(),
                    "Batch report",
                );
                production.update_shots(run.shots);
            }
        }
    }
    Ok(())
}

/// Log listener telemetry until the session closes its channel.
async fn log_listener_events(mut events: broadcast::Receiver<ListenerEvent>) {
    loop {
        match events.recv().await {
            Ok(ListenerEvent::Progress {
                prompt_id,
                percent,
                current_node,
                ..
            }) => {
                tracing::debug!(%prompt_id, percent, current_node = ?current_node, "Lip-sync progress");
            }
            Ok(ListenerEvent::Reconnecting { attempt, .. }) => {
                tracing::warn!(attempt, "ComfyUI listener reconnecting");
            }
            Ok(ListenerEvent::Lost { client_id }) => {
                tracing::error!(%client_id, "ComfyUI listener lost");
            }
            Ok(event) => tracing::debug!(?event, "Listener event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Listener event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
