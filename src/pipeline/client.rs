use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{Semaphore, watch};

use crate::error::AppError;
use crate::model::{Report, ReportRequest, ReportStatus, WorkflowState};
use crate::storage::Checkpoint;

use super::{PipelineDeps, PipelineResult, orchestrator};

const WORKFLOW_ID_PREFIX: &str = "report-pipeline-";

#[derive(Debug, Clone, Serialize)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub report_id: String,
}

struct Instance {
    cancel: Arc<AtomicBool>,
    state: watch::Receiver<WorkflowState>,
    result: watch::Receiver<Option<PipelineResult>>,
}

/// Process-local control surface over workflow instances: start, query,
/// cancel, await, resume. Every instance runs as a spawned task under the
/// workflow concurrency cap; queries never touch the instance task. An
/// instance evicts its registry entry once it reaches a terminal state,
/// after which the stored report is the source of truth.
pub struct PipelineClient {
    deps: Arc<PipelineDeps>,
    workflow_slots: Arc<Semaphore>,
    instances: Arc<Mutex<HashMap<String, Instance>>>,
}

impl PipelineClient {
    pub fn new(deps: Arc<PipelineDeps>, max_concurrent_workflows: usize) -> Self {
        Self {
            deps,
            workflow_slots: Arc::new(Semaphore::new(max_concurrent_workflows)),
            instances: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Maps a workflow id back to the report it drives.
    pub fn report_id_of(workflow_id: &str) -> Option<&str> {
        workflow_id.strip_prefix(WORKFLOW_ID_PREFIX)
    }

    /// Validates the request, creates the QUEUED report and spawns the
    /// workflow. Validation errors surface here, before any instance
    /// exists.
    pub async fn start(&self, mut request: ReportRequest) -> Result<StartedWorkflow, AppError> {
        request.validate()?;

        let report = Report::new(&request.title, request.style, request.output_formats.clone());
        self.deps.storage.create_report(&report).await?;

        let workflow_id = format!("{WORKFLOW_ID_PREFIX}{}", report.id);
        let checkpoint = Checkpoint::new(&workflow_id, &report.id, request);
        self.deps.storage.save_checkpoint(&checkpoint).await?;

        tracing::info!(workflow_id, report_id = %report.id, "workflow started");
        Ok(self.spawn_instance(checkpoint, &report))
    }

    /// Re-attaches a workflow from its durable checkpoint, replaying the
    /// completed steps. Terminal reports are not resumable.
    pub async fn resume(&self, workflow_id: &str) -> Result<StartedWorkflow, AppError> {
        let checkpoint = self
            .deps
            .storage
            .load_checkpoint(workflow_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("workflow {workflow_id}")))?;
        let report = self
            .deps
            .storage
            .get_report(&checkpoint.report_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("report {}", checkpoint.report_id)))?;
        if report.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "workflow {workflow_id} already reached a terminal state"
            )));
        }

        tracing::info!(
            workflow_id,
            report_id = %report.id,
            completed_steps = checkpoint.completed_steps.len(),
            "workflow resumed"
        );
        Ok(self.spawn_instance(checkpoint, &report))
    }

    fn spawn_instance(&self, checkpoint: Checkpoint, report: &Report) -> StartedWorkflow {
        let workflow_id = checkpoint.workflow_id.clone();
        let started = StartedWorkflow {
            workflow_id: workflow_id.clone(),
            report_id: report.id.clone(),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = watch::channel(WorkflowState {
            status: report.status,
            progress: report.progress,
            current_step: report.current_step.clone(),
            error: None,
        });
        let (result_tx, result_rx) = watch::channel(None);

        // Registered before the task is spawned so a fast instance cannot
        // evict an entry that was never inserted.
        self.instances
            .lock()
            .expect("instance registry poisoned")
            .insert(
                workflow_id.clone(),
                Instance {
                    cancel: cancel.clone(),
                    state: state_rx,
                    result: result_rx,
                },
            );

        let deps = self.deps.clone();
        let slots = self.workflow_slots.clone();
        let instances = self.instances.clone();
        tokio::spawn(async move {
            // The report stays QUEUED until a workflow slot frees up.
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let result =
                orchestrator::run_report_pipeline(deps, checkpoint, cancel, state_tx).await;
            let _ = result_tx.send(Some(result));
            instances
                .lock()
                .expect("instance registry poisoned")
                .remove(&workflow_id);
        });
        started
    }

    /// Synchronous snapshot of a running (or finished) instance. None when
    /// this process has no such instance.
    pub fn status(&self, workflow_id: &str) -> Option<WorkflowState> {
        let instances = self.instances.lock().expect("instance registry poisoned");
        instances
            .get(workflow_id)
            .map(|instance| instance.state.borrow().clone())
    }

    /// Requests cooperative cancellation. The instance notices at its next
    /// step boundary; the in-flight step runs to completion first. Returns
    /// false for unknown or already-terminal instances.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        let instances = self.instances.lock().expect("instance registry poisoned");
        match instances.get(workflow_id) {
            Some(instance) if !instance.state.borrow().status.is_terminal() => {
                instance.cancel.store(true, Ordering::SeqCst);
                tracing::info!(workflow_id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Waits for the instance's final result. Instances already evicted
    /// from the registry are answered from the stored report.
    pub async fn await_result(&self, workflow_id: &str) -> Result<PipelineResult, AppError> {
        let receiver = {
            let instances = self.instances.lock().expect("instance registry poisoned");
            instances
                .get(workflow_id)
                .map(|instance| instance.result.clone())
        };
        let Some(mut result) = receiver else {
            return self.finished_result(workflow_id).await;
        };
        let value = result
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AppError::Internal("workflow task dropped its result".into()))?;
        value
            .clone()
            .ok_or_else(|| AppError::Internal("workflow result missing".into()))
    }

    /// Rebuilds the result of a finished instance from its durable report.
    async fn finished_result(&self, workflow_id: &str) -> Result<PipelineResult, AppError> {
        let report_id = Self::report_id_of(workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("workflow {workflow_id}")))?;
        let report = self
            .deps
            .storage
            .get_report(report_id)
            .await?
            .filter(|report| report.status.is_terminal())
            .ok_or_else(|| AppError::NotFound(format!("workflow {workflow_id}")))?;
        Ok(PipelineResult {
            success: report.status == ReportStatus::Completed,
            report_id: report.id,
            error: report.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{CostRates, CostTracker};
    use crate::model::{InputBlock, OutputFormat, ReportStyle};
    use crate::pipeline::engine::{ActivityOptions, RetryPolicy};
    use crate::pipeline::insights::tests::StubGenerator;
    use crate::pipeline::PipelineOptions;
    use crate::render::charts::SvgChartRenderer;
    use crate::render::export::HtmlExporter;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;
    use serde_json::json;
    use std::time::Duration;

    fn client() -> (PipelineClient, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let cost = Arc::new(CostTracker::new(
            storage.clone(),
            CostRates {
                input_per_1k: 0.005,
                output_per_1k: 0.015,
                per_image: 0.04,
            },
        ));
        let deps = Arc::new(PipelineDeps {
            storage: storage.clone(),
            generator: Arc::new(StubGenerator),
            chart_renderer: Arc::new(SvgChartRenderer),
            exporters: vec![Arc::new(HtmlExporter)],
            cost,
            activity_slots: Arc::new(Semaphore::new(20)),
            options: PipelineOptions {
                activity: ActivityOptions {
                    retry: RetryPolicy::default(),
                    timeout: Duration::from_secs(600),
                    heartbeat_interval: Duration::from_secs(5),
                    heartbeat_grace: Duration::from_secs(3600),
                },
                generate_cover_image: false,
            },
        });
        (PipelineClient::new(deps, 10), storage)
    }

    fn request() -> ReportRequest {
        ReportRequest {
            title: "Weekly".to_string(),
            style: ReportStyle::Business,
            output_formats: vec![OutputFormat::Html],
            instructions: None,
            inputs: vec![InputBlock::Records {
                records: vec![json!({"a": 1}), json!({"a": 2})],
            }],
        }
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let (client, storage) = client();
        let started = client.start(request()).await.unwrap();

        let result = client.await_result(&started.workflow_id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.report_id, started.report_id);

        let report = storage.get_report(&started.report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.progress, 100);
    }

    #[tokio::test]
    async fn test_terminal_instance_evicted_but_result_still_answerable() {
        let (client, storage) = client();
        let started = client.start(request()).await.unwrap();
        let result = client.await_result(&started.workflow_id).await.unwrap();
        assert!(result.success);

        // The instance task removes its registry entry after publishing
        // the result; yield until that has happened.
        for _ in 0..100 {
            if client.status(&started.workflow_id).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(client.status(&started.workflow_id).is_none());

        // The stored report remains the source of truth and the final
        // result can still be reconstructed from it.
        let report = storage.get_report(&started.report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        let replay = client.await_result(&started.workflow_id).await.unwrap();
        assert!(replay.success);
        assert_eq!(replay.report_id, started.report_id);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_request_without_instance() {
        let (client, storage) = client();
        let mut bad = request();
        bad.inputs.clear();

        let err = client.start(bad).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(storage.list_reports().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_cancel_for_unknown_workflow() {
        let (client, _storage) = client();
        assert!(client.status("nope").is_none());
        assert!(!client.cancel("nope"));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_returns_false() {
        let (client, _storage) = client();
        let started = client.start(request()).await.unwrap();
        client.await_result(&started.workflow_id).await.unwrap();
        assert!(!client.cancel(&started.workflow_id));
    }
}
