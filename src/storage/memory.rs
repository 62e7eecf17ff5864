use std::collections::HashMap;
use std::sync::Mutex;

use crate::cost::CostMetrics;
use crate::error::{AppError, AppResult};
use crate::model::{Report, ReportPatch};

use super::{Checkpoint, Storage};

/// In-memory backend for tests and single-process development runs.
#[derive(Default)]
pub struct MemoryStorage {
    reports: Mutex<HashMap<String, Report>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    costs: Mutex<HashMap<String, CostMetrics>>,
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn file_key(report_id: &str, filename: &str) -> String {
        format!("{report_id}/{filename}")
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn create_report(&self, report: &Report) -> AppResult<()> {
        self.reports
            .lock()
            .unwrap()
            .insert(report.id.clone(), report.clone());
        Ok(())
    }

    async fn save_report(&self, id: &str, patch: &ReportPatch) -> AppResult<Report> {
        let mut reports = self.reports.lock().unwrap();
        let report = reports
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("report {id}")))?;
        report.apply(patch);
        Ok(report.clone())
    }

    async fn get_report(&self, id: &str) -> AppResult<Option<Report>> {
        Ok(self.reports.lock().unwrap().get(id).cloned())
    }

    async fn list_reports(&self) -> AppResult<Vec<Report>> {
        let mut reports: Vec<Report> = self.reports.lock().unwrap().values().cloned().collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    async fn save_output_file(
        &self,
        report_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<String> {
        self.files
            .lock()
            .unwrap()
            .insert(Self::file_key(report_id, filename), bytes.to_vec());
        Ok(self.output_file_location(report_id, filename).await)
    }

    async fn output_file_location(&self, report_id: &str, filename: &str) -> String {
        format!("mem://{report_id}/{filename}")
    }

    async fn file_exists(&self, report_id: &str, filename: &str) -> AppResult<bool> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .contains_key(&Self::file_key(report_id, filename)))
    }

    async fn file_size(&self, report_id: &str, filename: &str) -> AppResult<Option<u64>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&Self::file_key(report_id, filename))
            .map(|b| b.len() as u64))
    }

    async fn get_cost_metrics(&self, report_id: &str) -> AppResult<Option<CostMetrics>> {
        Ok(self.costs.lock().unwrap().get(report_id).cloned())
    }

    async fn put_cost_metrics(&self, metrics: &CostMetrics) -> AppResult<()> {
        self.costs
            .lock()
            .unwrap()
            .insert(metrics.report_id.clone(), metrics.clone());
        Ok(())
    }

    async fn list_cost_metrics(&self) -> AppResult<Vec<CostMetrics>> {
        Ok(self.costs.lock().unwrap().values().cloned().collect())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AppResult<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.workflow_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, workflow_id: &str) -> AppResult<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().unwrap().get(workflow_id).cloned())
    }

    async fn delete_checkpoint(&self, workflow_id: &str) -> AppResult<()> {
        self.checkpoints.lock().unwrap().remove(workflow_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutputFormat, ReportStatus, ReportStyle};

    #[tokio::test]
    async fn test_save_report_merges_patch() {
        let storage = MemoryStorage::new();
        let report = Report::new("Weekly", ReportStyle::Technical, vec![OutputFormat::Html]);
        let id = report.id.clone();
        storage.create_report(&report).await.unwrap();

        let merged = storage
            .save_report(
                &id,
                &ReportPatch {
                    status: Some(ReportStatus::Exporting),
                    progress: Some(90),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(merged.status, ReportStatus::Exporting);
        assert_eq!(merged.progress, 90);
        assert_eq!(merged.title, "Weekly");
    }

    #[tokio::test]
    async fn test_save_report_unknown_id() {
        let storage = MemoryStorage::new();
        let err = storage
            .save_report("missing", &ReportPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_output_files_idempotent_by_filename() {
        let storage = MemoryStorage::new();
        storage
            .save_output_file("r1", "report.html", b"first")
            .await
            .unwrap();
        storage
            .save_output_file("r1", "report.html", b"second")
            .await
            .unwrap();

        assert!(storage.file_exists("r1", "report.html").await.unwrap());
        assert_eq!(
            storage.file_size("r1", "report.html").await.unwrap(),
            Some(6)
        );
        assert!(!storage.file_exists("r1", "report.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip_and_delete() {
        let storage = MemoryStorage::new();
        let request = crate::model::ReportRequest {
            title: "t".to_string(),
            style: ReportStyle::Business,
            output_formats: vec![OutputFormat::Html],
            instructions: None,
            inputs: vec![],
        };
        let mut checkpoint = Checkpoint::new("wf-1", "r-1", request);
        checkpoint.completed_steps.push("profile".to_string());
        storage.save_checkpoint(&checkpoint).await.unwrap();

        let loaded = storage.load_checkpoint("wf-1").await.unwrap().unwrap();
        assert!(loaded.is_completed("profile"));
        assert!(!loaded.is_completed("export"));

        storage.delete_checkpoint("wf-1").await.unwrap();
        assert!(storage.load_checkpoint("wf-1").await.unwrap().is_none());
    }
}
