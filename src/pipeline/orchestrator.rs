use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::error::AppError;
use crate::model::{ReportPatch, ReportStatus, WorkflowState};
use crate::storage::Checkpoint;
use crate::telemetry::metrics::{PIPELINE_COMPLETED, PIPELINE_DURATION, PIPELINE_FAILED};

use super::engine::{self, ActivityContext};
use super::{PipelineDeps, PipelineResult, charts, export, insights, layout, profile};

pub const STEP_DATA_PROFILING: &str = "data_profiling";
pub const STEP_INSIGHT_GENERATION: &str = "insight_generation";
pub const STEP_CHART_GENERATION: &str = "chart_generation";
pub const STEP_LAYOUT_RENDERING: &str = "layout_rendering";
pub const STEP_EXPORTING: &str = "exporting";

/// Drives one workflow instance through all six steps. Any error escaping
/// a step lands in the single catch below, which marks the report FAILED
/// and folds the message into the result instead of propagating it.
#[tracing::instrument(
    name = "pipeline.run",
    skip_all,
    fields(workflow.id = %checkpoint.workflow_id, report.id = %checkpoint.report_id)
)]
pub async fn run_report_pipeline(
    deps: Arc<PipelineDeps>,
    checkpoint: Checkpoint,
    cancel: Arc<AtomicBool>,
    state: watch::Sender<WorkflowState>,
) -> PipelineResult {
    let started = std::time::Instant::now();
    let report_id = checkpoint.report_id.clone();

    let outcome = drive(&deps, checkpoint, &cancel, &state).await;
    PIPELINE_DURATION.record(started.elapsed().as_secs_f64(), &[]);

    match outcome {
        Ok(()) => {
            PIPELINE_COMPLETED.add(1, &[]);
            tracing::info!(report_id, "pipeline completed");
            PipelineResult {
                success: true,
                report_id,
                error: None,
            }
        }
        Err(err) => {
            PIPELINE_FAILED.add(1, &[]);
            let message = err.to_string();
            tracing::error!(report_id, error = %message, "pipeline failed");

            let patch = ReportPatch {
                status: Some(ReportStatus::Failed),
                error_message: Some(message.clone()),
                completed_at: Some(Utc::now()),
                ..Default::default()
            };
            if let Err(save_err) = deps.storage.save_report(&report_id, &patch).await {
                tracing::error!(report_id, error = %save_err, "failed to persist FAILED status");
            }

            let mut snapshot = state.borrow().clone();
            snapshot.status = ReportStatus::Failed;
            snapshot.error = Some(message.clone());
            let _ = state.send(snapshot);

            PipelineResult {
                success: false,
                report_id,
                error: Some(message),
            }
        }
    }
}

async fn drive(
    deps: &PipelineDeps,
    mut checkpoint: Checkpoint,
    cancel: &AtomicBool,
    state: &watch::Sender<WorkflowState>,
) -> Result<(), AppError> {
    let request = checkpoint.request.clone();
    let report = deps
        .storage
        .get_report(&checkpoint.report_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("report {}", checkpoint.report_id)))?;

    check_cancel(cancel)?;
    transition(deps, state, &report.id, ReportStatus::DataProfiling, 10, STEP_DATA_PROFILING).await?;
    let profiled = {
        let inputs = &request.inputs;
        checkpointed(deps, &mut checkpoint, STEP_DATA_PROFILING, move |ctx| async move {
            profile::run(&ctx, inputs.clone()).await
        })
        .await?
    };
    deps.storage
        .save_report(
            &report.id,
            &ReportPatch {
                data_profile: Some(profiled.profile.clone()),
                ..Default::default()
            },
        )
        .await?;

    check_cancel(cancel)?;
    transition(deps, state, &report.id, ReportStatus::InsightGeneration, 30, STEP_INSIGHT_GENERATION).await?;
    let narrative_outcome = {
        let generator = &deps.generator;
        let cost = &deps.cost;
        let report = &report;
        let profiled = &profiled;
        let instructions = request.instructions.as_deref();
        checkpointed(deps, &mut checkpoint, STEP_INSIGHT_GENERATION, move |ctx| async move {
            insights::run(&ctx, generator, cost, report, profiled, instructions).await
        })
        .await?
    };

    check_cancel(cancel)?;
    transition(deps, state, &report.id, ReportStatus::ChartGeneration, 50, STEP_CHART_GENERATION).await?;
    let rendered_charts = {
        let renderer = &deps.chart_renderer;
        let cost = &deps.cost;
        let report_id = report.id.as_str();
        let profiled = &profiled;
        checkpointed(deps, &mut checkpoint, STEP_CHART_GENERATION, move |ctx| async move {
            charts::run(&ctx, renderer, cost, report_id, profiled).await
        })
        .await?
    };

    check_cancel(cancel)?;
    transition(deps, state, &report.id, ReportStatus::LayoutRendering, 70, STEP_LAYOUT_RENDERING).await?;
    let layout_output = {
        let generator = &deps.generator;
        let cost = &deps.cost;
        let cover = deps.options.generate_cover_image;
        let report = &report;
        let narrative = &narrative_outcome.narrative;
        let rendered_charts = rendered_charts.as_slice();
        let profile = &profiled.profile;
        checkpointed(deps, &mut checkpoint, STEP_LAYOUT_RENDERING, move |ctx| async move {
            layout::run(&ctx, generator, cost, cover, report, narrative, rendered_charts, profile)
                .await
        })
        .await?
    };

    check_cancel(cancel)?;
    transition(deps, state, &report.id, ReportStatus::Exporting, 90, STEP_EXPORTING).await?;
    let files = {
        let storage = &deps.storage;
        let exporters = deps.exporters.as_slice();
        let report = &report;
        let narrative = &narrative_outcome.narrative;
        let rendered_charts = rendered_charts.as_slice();
        let profile = &profiled.profile;
        let layout_html = layout_output.html.as_str();
        checkpointed(deps, &mut checkpoint, STEP_EXPORTING, move |ctx| async move {
            export::run(
                &ctx,
                storage,
                exporters,
                report,
                narrative,
                rendered_charts,
                profile,
                layout_html,
            )
            .await
        })
        .await?
    };

    check_cancel(cancel)?;
    deps.storage
        .save_report(
            &report.id,
            &ReportPatch {
                status: Some(ReportStatus::Completed),
                progress: Some(100),
                current_step: Some("completed".to_string()),
                completed_at: Some(Utc::now()),
                files: Some(files),
                ..Default::default()
            },
        )
        .await?;
    let _ = state.send(WorkflowState {
        status: ReportStatus::Completed,
        progress: 100,
        current_step: "completed".to_string(),
        error: None,
    });
    deps.storage.delete_checkpoint(&checkpoint.workflow_id).await?;

    Ok(())
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), AppError> {
    if cancel.load(Ordering::SeqCst) {
        Err(AppError::Cancelled("cancelled by user".into()))
    } else {
        Ok(())
    }
}

/// Persists the `(status, progress, current_step)` tuple before the step
/// runs, then mirrors it into the process-local state channel.
async fn transition(
    deps: &PipelineDeps,
    state: &watch::Sender<WorkflowState>,
    report_id: &str,
    status: ReportStatus,
    progress: u8,
    step: &str,
) -> Result<(), AppError> {
    tracing::info!(report_id, step, progress, "pipeline step starting");
    deps.storage
        .save_report(
            report_id,
            &ReportPatch {
                status: Some(status),
                progress: Some(progress),
                current_step: Some(step.to_string()),
                ..Default::default()
            },
        )
        .await?;
    let _ = state.send(WorkflowState {
        status,
        progress,
        current_step: step.to_string(),
        error: None,
    });
    Ok(())
}

/// Runs a step as a retried activity unless the checkpoint already carries
/// its output, in which case the recorded output is replayed. Successful
/// outputs are committed to the checkpoint before the next step may start.
async fn checkpointed<T, F, Fut>(
    deps: &PipelineDeps,
    checkpoint: &mut Checkpoint,
    step: &'static str,
    run: F,
) -> Result<T, AppError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(ActivityContext) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    if checkpoint.is_completed(step) {
        if let Some(value) = checkpoint.outputs.get(step) {
            tracing::info!(step, "step already checkpointed, replaying output");
            return Ok(serde_json::from_value(value.clone())?);
        }
    }

    let _slot = deps
        .activity_slots
        .acquire()
        .await
        .map_err(|_| AppError::Internal("activity semaphore closed".into()))?;

    let output =
        engine::run_activity(&checkpoint.workflow_id, step, &deps.options.activity, run).await?;

    checkpoint
        .outputs
        .insert(step.to_string(), serde_json::to_value(&output)?);
    checkpoint.completed_steps.push(step.to_string());
    deps.storage.save_checkpoint(checkpoint).await?;
    Ok(output)
}
