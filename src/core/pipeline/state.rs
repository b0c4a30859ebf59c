use serde::Serialize;
use serde_json::{Value, json};

use super::{RunMode, Step};
use crate::core::generator::PageSpec;
use crate::core::llm::ChatMessage;
use crate::core::mock_data::MockDataSet;
use crate::core::patch::{DataImpact, EditOperation, PatchSummary};
use crate::core::tree::{ConfigTree, Entity};

/// Everything one run accumulates. Owned by the engine for the run's
/// lifetime; the coordinator only ever sees `snapshot()` output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub project_id: String,
    pub mode: RunMode,
    pub step: Step,
    pub instruction: String,
    #[serde(skip)]
    pub prior_messages: Vec<ChatMessage>,
    pub user_id: Option<String>,
    pub base_version: Option<u64>,

    pub app_name: Option<String>,
    pub use_case_summary: Option<String>,
    pub entities: Vec<Entity>,
    pub pages: Vec<PageSpec>,

    /// Version the edit starts from.
    pub source_version: Option<u64>,
    #[serde(skip)]
    pub source: Option<ConfigTree>,
    #[serde(skip)]
    pub source_data: Option<MockDataSet>,

    pub edit: Option<EditOperation>,
    pub patch: Option<PatchSummary>,
    pub data_impact: Option<DataImpact>,

    /// Latest committed version produced by this run.
    pub version: Option<u64>,
    #[serde(skip)]
    pub config: Option<ConfigTree>,
    #[serde(skip)]
    pub mock_data: Option<MockDataSet>,
}

impl RunState {
    pub fn new(run_id: &str, project_id: &str, mode: RunMode, instruction: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            project_id: project_id.to_string(),
            mode,
            step: mode.first_step(),
            instruction: instruction.to_string(),
            prior_messages: Vec::new(),
            user_id: None,
            base_version: None,
            app_name: None,
            use_case_summary: None,
            entities: Vec::new(),
            pages: Vec::new(),
            source_version: None,
            source: None,
            source_data: None,
            edit: None,
            patch: None,
            data_impact: None,
            version: None,
            config: None,
            mock_data: None,
        }
    }

    /// Read-only view recorded with each checkpoint. Trees and data sets are
    /// summarized; they already live in their own tables.
    pub fn snapshot(&self) -> Value {
        let mut snapshot = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(map) = snapshot.as_object_mut() {
            if let Some(config) = &self.config {
                map.insert(
                    "pageKeys".to_string(),
                    json!(config.pages.keys().collect::<Vec<_>>()),
                );
            }
            if let Some(data) = &self.mock_data {
                map.insert("recordCount".to_string(), json!(data.record_count()));
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generator::layout::{default_tree, task_entity};

    #[test]
    fn snapshot_summarizes_large_values() {
        let mut state = RunState::new("r1", "p1", RunMode::Create, "a task tracker");
        state.entities = vec![task_entity()];
        state.config = Some(default_tree("Tasks", vec![task_entity()]));
        state.version = Some(1);

        let snapshot = state.snapshot();
        assert_eq!(snapshot["runId"], "r1");
        assert_eq!(snapshot["mode"], "create");
        assert_eq!(snapshot["step"], "analyze_intent");
        assert_eq!(snapshot["version"], 1);
        assert_eq!(snapshot["pageKeys"], json!(["dashboard", "tasks"]));
        assert!(snapshot.get("config").is_none());
    }
}
