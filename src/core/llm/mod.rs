mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    // Execute a prompt against a model using a structured conversation history
    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// Extract a JSON block from LLM output. Tries fenced ```json ... ``` first,
/// then raw JSON starting with `{` or `[`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    // Try fenced code block first
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    // Try raw JSON (starts with { or [)
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_block() {
        let out = "Sure:\n```json\n{\"app_name\": \"Tasks\"}\n```\nanything else?";
        assert_eq!(extract_json_block(out), Some("{\"app_name\": \"Tasks\"}"));
    }

    #[test]
    fn extracts_raw_object() {
        assert_eq!(extract_json_block("  {\"a\":1} "), Some("{\"a\":1}"));
        assert_eq!(extract_json_block("[1,2]"), Some("[1,2]"));
    }

    #[test]
    fn plain_text_has_no_block() {
        assert!(extract_json_block("I can't do that").is_none());
        assert!(extract_json_block("").is_none());
    }
}
