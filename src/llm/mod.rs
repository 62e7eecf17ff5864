pub mod anthropic;
pub mod client;
pub mod narrative;
pub mod openai;

use serde::{Deserialize, Serialize};

pub use client::LlmClient;

use crate::error::AppError;
use crate::model::ReportStyle;
use crate::profiler::{DataProfile, Record};

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub step: String,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// Raw image bytes for a prompt. Not every provider supports this.
    async fn generate_image(&self, _prompt: &str) -> anyhow::Result<Vec<u8>> {
        Err(anyhow::anyhow!("image generation not supported"))
    }

    fn name(&self) -> &str;
}

/// Structured narrative produced for a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub executive_summary: String,
    pub sections: Vec<NarrativeSection>,
    pub recommendations: Vec<String>,
    pub key_findings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub heading: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeOutcome {
    pub narrative: Narrative,
    pub usage: TokenUsage,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct NarrativeParams {
    pub title: String,
    pub style: ReportStyle,
    pub profile: DataProfile,
    pub records: Vec<Record>,
    pub text_blocks: Vec<String>,
    pub instructions: Option<String>,
}

/// The narrative collaborator seam consumed by the pipeline. `LlmClient`
/// is the production implementation; tests substitute their own.
#[async_trait::async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate_narrative(
        &self,
        params: &NarrativeParams,
    ) -> Result<NarrativeOutcome, AppError>;

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, AppError>;
}
