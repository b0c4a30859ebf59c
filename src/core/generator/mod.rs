//! The natural-language side of a run. A `Generator` turns an instruction
//! plus the run's accumulated state into one structured result per task.

pub mod layout;
mod llm;
mod template;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GeneratorConfig;
use crate::core::llm::{ChatMessage, OpenAiProvider};
use crate::core::patch::EditOperation;
use crate::core::tree::{ConfigTree, Entity};

pub use llm::LlmGenerator;
pub use template::TemplateGenerator;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed output: {0}")]
    Malformed(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl GenerationError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Unsupported(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    AnalyzeIntent,
    UseCases,
    PageConfig,
    EditIntent,
}

impl GenerationTask {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationTask::AnalyzeIntent => "analyze_intent",
            GenerationTask::UseCases => "use_cases",
            GenerationTask::PageConfig => "page_config",
            GenerationTask::EditIntent => "edit_intent",
        }
    }
}

/// Everything a generator may look at for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub task: GenerationTask,
    pub instruction: &'a str,
    pub prior_messages: &'a [ChatMessage],
    pub app_name: Option<&'a str>,
    pub use_case_summary: Option<&'a str>,
    pub entities: &'a [Entity],
    pub pages: &'a [PageSpec],
    pub current: Option<&'a ConfigTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSummary {
    #[serde(alias = "app_name")]
    pub app_name: String,
    #[serde(alias = "use_case_summary")]
    pub use_case_summary: String,
}

/// A page the use-case step asks for, before any layout exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub title: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, alias = "parent_page", skip_serializing_if = "Option::is_none")]
    pub parent_page: Option<String>,
}

impl PageSpec {
    /// Explicit key, else the path without slashes, else the slugged title.
    pub fn key(&self) -> String {
        if let Some(key) = &self.key
            && !key.trim().is_empty()
        {
            return key.trim().to_string();
        }
        let from_path = self.path.trim().trim_matches('/').replace('/', "-");
        if !from_path.is_empty() {
            return from_path.to_lowercase();
        }
        self.title
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseCasePlan {
    pub entities: Vec<Entity>,
    pub pages: Vec<PageSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResult {
    Intent(IntentSummary),
    UseCases(UseCasePlan),
    PageConfig(ConfigTree),
    Edit(EditOperation),
}

impl StructuredResult {
    fn label(&self) -> &'static str {
        match self {
            StructuredResult::Intent(_) => "intent",
            StructuredResult::UseCases(_) => "use cases",
            StructuredResult::PageConfig(_) => "page config",
            StructuredResult::Edit(_) => "edit operation",
        }
    }

    fn mismatch(self, expected: &str) -> GenerationError {
        GenerationError::Malformed(format!("expected {}, got {}", expected, self.label()))
    }

    pub fn into_intent(self) -> Result<IntentSummary, GenerationError> {
        match self {
            StructuredResult::Intent(i) => Ok(i),
            other => Err(other.mismatch("intent")),
        }
    }

    pub fn into_use_cases(self) -> Result<UseCasePlan, GenerationError> {
        match self {
            StructuredResult::UseCases(p) => Ok(p),
            other => Err(other.mismatch("use cases")),
        }
    }

    pub fn into_page_config(self) -> Result<ConfigTree, GenerationError> {
        match self {
            StructuredResult::PageConfig(t) => Ok(t),
            other => Err(other.mismatch("page config")),
        }
    }

    pub fn into_edit(self) -> Result<EditOperation, GenerationError> {
        match self {
            StructuredResult::Edit(op) => Ok(op),
            other => Err(other.mismatch("edit operation")),
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<StructuredResult, GenerationError>;
}

/// Build the generator named by the `[generator]` config section.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "template" => {
            info!("Using template generator");
            Ok(Arc::new(TemplateGenerator::new()))
        }
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                anyhow!(
                    "Generator provider 'openai' needs an API key in ${}",
                    config.api_key_env
                )
            })?;
            info!("Using OpenAI-compatible generator ({} @ {})", config.model, config.base_url);
            let provider = OpenAiProvider::new(&config.base_url, api_key);
            Ok(Arc::new(LlmGenerator::new(Arc::new(provider), &config.model)))
        }
        other => Err(anyhow!("Unknown generator provider '{}'", other)),
    }
}
