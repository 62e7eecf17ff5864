use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::cost::CostMetrics;
use crate::error::{AppError, AppResult};
use crate::model::{Report, ReportPatch};

use super::{Checkpoint, Storage};

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(25)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("Database connection pool created");

    Ok(pool)
}

/// Postgres backend: records as JSONB payloads, output artifacts as bytea.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> AppResult<()> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS reports (\
             id TEXT PRIMARY KEY, payload JSONB NOT NULL, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
            "CREATE TABLE IF NOT EXISTS cost_metrics (\
             report_id TEXT PRIMARY KEY, payload JSONB NOT NULL)",
            "CREATE TABLE IF NOT EXISTS checkpoints (\
             workflow_id TEXT PRIMARY KEY, payload JSONB NOT NULL)",
            "CREATE TABLE IF NOT EXISTS output_files (\
             report_id TEXT NOT NULL, filename TEXT NOT NULL, \
             bytes BYTEA NOT NULL, PRIMARY KEY (report_id, filename))",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for PgStorage {
    #[tracing::instrument(name = "db.reports.create", skip_all)]
    async fn create_report(&self, report: &Report) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO reports (id, payload) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload",
        )
        .bind(&report.id)
        .bind(serde_json::to_value(report)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "db.reports.save", skip(self, patch))]
    async fn save_report(&self, id: &str, patch: &ReportPatch) -> AppResult<Report> {
        let row = sqlx::query("SELECT payload FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("report {id}")))?;

        let payload: serde_json::Value = row.get("payload");
        let mut report: Report = serde_json::from_value(payload)?;
        report.apply(patch);

        sqlx::query("UPDATE reports SET payload = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(&report)?)
            .execute(&self.pool)
            .await?;

        Ok(report)
    }

    #[tracing::instrument(name = "db.reports.get", skip(self))]
    async fn get_report(&self, id: &str) -> AppResult<Option<Report>> {
        let row = sqlx::query("SELECT payload FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let payload: serde_json::Value = row.get("payload");
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(name = "db.reports.list", skip(self))]
    async fn list_reports(&self) -> AppResult<Vec<Report>> {
        let rows = sqlx::query("SELECT payload FROM reports ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.get("payload");
                serde_json::from_value(payload).map_err(AppError::from)
            })
            .collect()
    }

    #[tracing::instrument(name = "db.output_files.save", skip(self, bytes))]
    async fn save_output_file(
        &self,
        report_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> AppResult<String> {
        sqlx::query(
            "INSERT INTO output_files (report_id, filename, bytes) VALUES ($1, $2, $3) \
             ON CONFLICT (report_id, filename) DO UPDATE SET bytes = EXCLUDED.bytes",
        )
        .bind(report_id)
        .bind(filename)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(self.output_file_location(report_id, filename).await)
    }

    async fn output_file_location(&self, report_id: &str, filename: &str) -> String {
        format!("pg://output_files/{report_id}/{filename}")
    }

    async fn file_exists(&self, report_id: &str, filename: &str) -> AppResult<bool> {
        let row =
            sqlx::query("SELECT 1 AS one FROM output_files WHERE report_id = $1 AND filename = $2")
                .bind(report_id)
                .bind(filename)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn file_size(&self, report_id: &str, filename: &str) -> AppResult<Option<u64>> {
        let row = sqlx::query(
            "SELECT octet_length(bytes) AS size FROM output_files \
             WHERE report_id = $1 AND filename = $2",
        )
        .bind(report_id)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| {
            let size: i32 = r.get("size");
            size as u64
        }))
    }

    async fn get_cost_metrics(&self, report_id: &str) -> AppResult<Option<CostMetrics>> {
        let row = sqlx::query("SELECT payload FROM cost_metrics WHERE report_id = $1")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let payload: serde_json::Value = row.get("payload");
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    async fn put_cost_metrics(&self, metrics: &CostMetrics) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO cost_metrics (report_id, payload) VALUES ($1, $2) \
             ON CONFLICT (report_id) DO UPDATE SET payload = EXCLUDED.payload",
        )
        .bind(&metrics.report_id)
        .bind(serde_json::to_value(metrics)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_cost_metrics(&self) -> AppResult<Vec<CostMetrics>> {
        let rows = sqlx::query("SELECT payload FROM cost_metrics")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.get("payload");
                serde_json::from_value(payload).map_err(AppError::from)
            })
            .collect()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO checkpoints (workflow_id, payload) VALUES ($1, $2) \
             ON CONFLICT (workflow_id) DO UPDATE SET payload = EXCLUDED.payload",
        )
        .bind(&checkpoint.workflow_id)
        .bind(serde_json::to_value(checkpoint)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, workflow_id: &str) -> AppResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT payload FROM checkpoints WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let payload: serde_json::Value = row.get("payload");
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    async fn delete_checkpoint(&self, workflow_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM checkpoints WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
