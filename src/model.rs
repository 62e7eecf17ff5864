use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::profiler::DataProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Queued,
    DataProfiling,
    InsightGeneration,
    ChartGeneration,
    LayoutRendering,
    Exporting,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStyle {
    Business,
    Research,
    Technical,
}

impl ReportStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStyle::Business => "business",
            ReportStyle::Research => "research",
            ReportStyle::Technical => "technical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Docx,
    Html,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
            OutputFormat::Html => "html",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFile {
    pub format: OutputFormat,
    pub location: String,
    pub size_bytes: u64,
    pub generated_at: DateTime<Utc>,
}

/// Lifecycle record for one generation request. Created QUEUED at pipeline
/// start; mutated only by the orchestrator; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    pub style: ReportStyle,
    pub status: ReportStatus,
    pub output_formats: Vec<OutputFormat>,
    pub progress: u8,
    pub current_step: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub files: Vec<ReportFile>,
    pub data_profile: Option<DataProfile>,
}

impl Report {
    pub fn new(title: &str, style: ReportStyle, output_formats: Vec<OutputFormat>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            style,
            status: ReportStatus::Queued,
            output_formats,
            progress: 0,
            current_step: "queued".to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            files: Vec::new(),
            data_profile: None,
        }
    }

    /// Merge a partial update into this record, bumping `updated_at`.
    pub fn apply(&mut self, patch: &ReportPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(ref step) = patch.current_step {
            self.current_step = step.clone();
        }
        if let Some(ref completed_at) = patch.completed_at {
            self.completed_at = Some(*completed_at);
        }
        if let Some(ref message) = patch.error_message {
            self.error_message = Some(message.clone());
        }
        if let Some(ref files) = patch.files {
            self.files = files.clone();
        }
        if let Some(ref profile) = patch.data_profile {
            self.data_profile = Some(profile.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial Report update for `Storage::save_report`. Absent fields are left
/// untouched in the stored record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportPatch {
    pub status: Option<ReportStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub files: Option<Vec<ReportFile>>,
    pub data_profile: Option<DataProfile>,
}

/// Live view of a running instance, answerable at any time without blocking
/// the instance itself.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub status: ReportStatus,
    pub progress: u8,
    pub current_step: String,
    pub error: Option<String>,
}

/// One heterogeneous input block, either tabular or free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputBlock {
    /// JSON array-of-objects.
    Records { records: Vec<serde_json::Value> },
    /// Raw CSV text with a header row.
    Csv { content: String },
    /// Base64-encoded spreadsheet payload (decoded and parsed as CSV).
    Spreadsheet { content: String },
    /// Free text / markdown, passed through verbatim.
    Text { content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub title: String,
    pub style: ReportStyle,
    pub output_formats: Vec<OutputFormat>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub inputs: Vec<InputBlock>,
}

impl ReportRequest {
    /// Validates and normalizes the request. Duplicate output formats are
    /// deduplicated, first occurrence wins; unknown formats never get this
    /// far because deserialization rejects them.
    pub fn validate(&mut self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title must not be empty".into()));
        }
        if self.inputs.is_empty() {
            return Err(AppError::Validation("inputs must not be empty".into()));
        }
        if self.output_formats.is_empty() {
            return Err(AppError::Validation(
                "output_formats must not be empty".into(),
            ));
        }
        let mut seen = Vec::new();
        self.output_formats.retain(|f| {
            if seen.contains(f) {
                false
            } else {
                seen.push(*f);
                true
            }
        });
        Ok(())
    }
}
