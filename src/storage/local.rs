use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;

use crate::cost::CostMetrics;
use crate::error::{AppError, AppResult};
use crate::model::{Report, ReportPatch};

use super::{Checkpoint, Storage};

/// Local-disk backend: JSON records under `reports/`, `costs/` and
/// `checkpoints/`, output artifacts under `outputs/<report_id>/`.
pub struct LocalStorage {
    root: PathBuf,
    // Serializes report read-merge-write cycles.
    write_lock: Mutex<()>,
}

impl LocalStorage {
    pub async fn new(root: impl AsRef<Path>) -> AppResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in ["reports", "costs", "checkpoints", "outputs"] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn report_path(&self, id: &str) -> PathBuf {
        self.root.join("reports").join(format!("{id}.json"))
    }

    fn cost_path(&self, report_id: &str) -> PathBuf {
        self.root.join("costs").join(format!("{report_id}.json"))
    }

    fn checkpoint_path(&self, workflow_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(format!("{workflow_id}.json"))
    }

    fn output_path(&self, report_id: &str, filename: &str) -> PathBuf {
        self.root.join("outputs").join(report_id).join(filename)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> AppResult<()> {
        fs::write(path, serde_json::to_vec_pretty(value)?).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for LocalStorage {
    async fn create_report(&self, report: &Report) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::write_json(&self.report_path(&report.id), report).await
    }

    async fn save_report(&self, id: &str, patch: &ReportPatch) -> AppResult<Report> {
        let _guard = self.write_lock.lock().await;
        let path = self.report_path(id);
        let mut report: Report = Self::read_json(&path)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("report {id}")))?;
        report.apply(patch);
        Self::write_json(&path, &report).await?;
        Ok(report)
    }

    async fn get_report(&self, id: &str) -> AppResult<Option<Report>> {
        Self::read_json(&self.report_path(id)).await
    }

    async fn list_reports(&self) -> AppResult<Vec<Report>> {
        let mut reports = Vec::new();
        let mut entries = fs::read_dir(self.root.join("reports")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(report) = Self::read_json::<Report>(&entry.path()).await? {
                reports.push(report);
            }
        }
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    async fn save_output_file(
        &self,
        report_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<String> {
        let path = self.output_path(report_id, filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn output_file_location(&self, report_id: &str, filename: &str) -> String {
        self.output_path(report_id, filename)
            .to_string_lossy()
            .into_owned()
    }

    async fn file_exists(&self, report_id: &str, filename: &str) -> AppResult<bool> {
        Ok(fs::try_exists(self.output_path(report_id, filename)).await?)
    }

    async fn file_size(&self, report_id: &str, filename: &str) -> AppResult<Option<u64>> {
        match fs::metadata(self.output_path(report_id, filename)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cost_metrics(&self, report_id: &str) -> AppResult<Option<CostMetrics>> {
        Self::read_json(&self.cost_path(report_id)).await
    }

    async fn put_cost_metrics(&self, metrics: &CostMetrics) -> AppResult<()> {
        Self::write_json(&self.cost_path(&metrics.report_id), metrics).await
    }

    async fn list_cost_metrics(&self) -> AppResult<Vec<CostMetrics>> {
        let mut ledgers = Vec::new();
        let mut entries = fs::read_dir(self.root.join("costs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(metrics) = Self::read_json::<CostMetrics>(&entry.path()).await? {
                ledgers.push(metrics);
            }
        }
        Ok(ledgers)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AppResult<()> {
        Self::write_json(&self.checkpoint_path(&checkpoint.workflow_id), checkpoint).await
    }

    async fn load_checkpoint(&self, workflow_id: &str) -> AppResult<Option<Checkpoint>> {
        Self::read_json(&self.checkpoint_path(workflow_id)).await
    }

    async fn delete_checkpoint(&self, workflow_id: &str) -> AppResult<()> {
        match fs::remove_file(self.checkpoint_path(workflow_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
