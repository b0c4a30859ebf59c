//! Run admission and everything the surfaces call into: start, cancel,
//! rollback and project snapshots.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::coordinator::Coordinator;
use crate::core::error::RunError;
use crate::core::generator::Generator;
use crate::core::llm::ChatMessage;
use crate::core::mock_data::MockDataSet;
use crate::core::pipeline::{Pipeline, PipelineSettings, RunMode, RunOutcome, RunState};
use crate::core::progress::{ProgressHub, Subscription};
use crate::core::runs::{RunLease, RunRegistry};
use crate::core::store::{CommitBatch, ConfigVersion, ProjectStore};
use crate::core::tree::ConfigTree;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default, alias = "project_id")]
    pub project_id: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(alias = "user_input", alias = "prompt")]
    pub instruction: String,
    #[serde(default, alias = "prior_messages")]
    pub prior_messages: Vec<ChatMessage>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(default, alias = "base_version")]
    pub base_version: Option<u64>,
}

fn default_mode() -> RunMode {
    RunMode::Create
}

impl RunRequest {
    pub fn new(mode: RunMode, instruction: &str) -> Self {
        Self {
            project_id: None,
            mode,
            instruction: instruction.to_string(),
            prior_messages: Vec::new(),
            user_id: None,
            base_version: None,
        }
    }

    pub fn for_project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    pub status: &'static str,
    pub project_id: String,
    pub channel_id: String,
}

pub fn channel_id(project_id: &str) -> String {
    format!("agent-updates-{}", project_id)
}

/// A project's descriptor and data at one version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub project_id: String,
    pub version: u64,
    pub app_config: ConfigTree,
    pub mock_data: MockDataSet,
}

pub struct ForgeService {
    pipeline: Arc<Pipeline>,
    runs: RunRegistry,
}

impl ForgeService {
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<dyn ProjectStore>,
        hub: Arc<ProgressHub>,
        settings: PipelineSettings,
    ) -> Self {
        let coordinator = Coordinator::new(store, hub);
        Self {
            pipeline: Arc::new(Pipeline::new(generator, coordinator, settings)),
            runs: RunRegistry::new(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        self.pipeline.coordinator()
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        self.coordinator().store()
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Validate the request and take the project's lease. Nothing is
    /// published for a rejected request.
    fn admit(&self, request: RunRequest) -> Result<(RunState, RunLease), RunError> {
        let instruction = request.instruction.trim();
        if instruction.is_empty() {
            return Err(RunError::Validation("instruction must not be empty".into()));
        }
        let project_id = match (request.mode, request.project_id) {
            (_, Some(id)) if !id.trim().is_empty() => id.trim().to_string(),
            (RunMode::Edit, _) => {
                return Err(RunError::Validation("an edit run needs a projectId".into()));
            }
            (RunMode::Create, _) => uuid::Uuid::new_v4().to_string(),
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let lease = self.runs.try_acquire(&project_id, &run_id)?;

        let mut state = RunState::new(&run_id, &project_id, request.mode, instruction);
        state.prior_messages = request.prior_messages;
        state.user_id = request.user_id;
        state.base_version = request.base_version;
        Ok((state, lease))
    }

    /// Admit the run and execute it in the background.
    pub fn start_run(&self, request: RunRequest) -> Result<RunStarted, RunError> {
        let (state, lease) = self.admit(request)?;
        let project_id = state.project_id.clone();
        info!(
            "Accepted {} run {} for project {}",
            state.mode.as_str(),
            state.run_id,
            project_id
        );
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            pipeline.run(state, lease).await;
        });
        Ok(RunStarted {
            status: "started",
            channel_id: channel_id(&project_id),
            project_id,
        })
    }

    /// Admit the run and wait for it to finish.
    pub async fn run_to_completion(&self, request: RunRequest) -> Result<RunOutcome, RunError> {
        let (state, lease) = self.admit(request)?;
        Ok(self.pipeline.run(state, lease).await)
    }

    /// Follow a project's progress from `after`. `None` for a project that
    /// has never published and has no run in flight.
    pub async fn subscribe(&self, project_id: &str, after: Option<u64>) -> anyhow::Result<Option<Subscription>> {
        self.coordinator()
            .subscribe(project_id, after, self.runs.is_active(project_id))
            .await
    }

    pub fn cancel(&self, project_id: &str) -> Option<String> {
        self.runs.cancel(project_id)
    }

    /// Append a new version equal to version `version`, with the data that
    /// was current at it, in one commit. History is never rewritten.
    pub async fn rollback(&self, project_id: &str, version: u64) -> Result<ConfigVersion, RunError> {
        let run_id = format!("rollback-{}", uuid::Uuid::new_v4());
        let _lease = self.runs.try_acquire(project_id, &run_id)?;
        let store = self.store();

        let target = store
            .version(project_id, version)
            .await
            .map_err(RunError::persistence)?
            .ok_or_else(|| {
                RunError::Validation(format!("project '{}' has no version {}", project_id, version))
            })?;
        let data = store
            .mock_data_at(project_id, version)
            .await
            .map_err(RunError::persistence)?;

        let next = store
            .latest_version(project_id)
            .await
            .map_err(RunError::persistence)?
            .map(|v| v.version + 1)
            .unwrap_or(1);
        let batch = CommitBatch {
            version: Some((next, target.tree)),
            mock_data: data.map(|d| (next, d)),
            ..CommitBatch::default()
        };
        store
            .commit(project_id, &batch)
            .await
            .map_err(RunError::persistence)?;
        let committed = store
            .version(project_id, next)
            .await
            .map_err(RunError::persistence)?
            .ok_or_else(|| RunError::Persistence(format!("{} v{} missing after commit", project_id, next)))?;
        info!(
            "Rolled project {} back to v{} as v{}",
            project_id, version, committed.version
        );
        Ok(committed)
    }

    /// Latest version, or `version` when given.
    pub async fn snapshot(&self, project_id: &str, version: Option<u64>) -> anyhow::Result<Option<ProjectSnapshot>> {
        let store = self.store();
        let config = match version {
            Some(v) => store.version(project_id, v).await?,
            None => store.latest_version(project_id).await?,
        };
        let Some(config) = config else {
            return Ok(None);
        };
        let mock_data = store
            .mock_data_at(project_id, config.version)
            .await?
            .unwrap_or_default();
        Ok(Some(ProjectSnapshot {
            project_id: project_id.to_string(),
            version: config.version,
            app_config: config.tree,
            mock_data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_loose_keys() {
        let request: RunRequest = serde_json::from_str(
            r#"{"project_id": "p1", "mode": "edit", "user_input": "add a chart", "base_version": 3}"#,
        )
        .unwrap();
        assert_eq!(request.project_id.as_deref(), Some("p1"));
        assert_eq!(request.mode, RunMode::Edit);
        assert_eq!(request.instruction, "add a chart");
        assert_eq!(request.base_version, Some(3));

        let request: RunRequest = serde_json::from_str(
            r#"{"instruction": "a task tracker", "priorMessages": [{"role": "user", "content": "hi"}]}"#,
        )
        .unwrap();
        assert_eq!(request.mode, RunMode::Create);
        assert_eq!(request.prior_messages.len(), 1);
    }

    #[test]
    fn started_response_shape() {
        let started = RunStarted {
            status: "started",
            project_id: "p1".into(),
            channel_id: channel_id("p1"),
        };
        assert_eq!(
            serde_json::to_value(started).unwrap(),
            serde_json::json!({"status": "started", "projectId": "p1", "channelId": "agent-updates-p1"})
        );
    }
}
