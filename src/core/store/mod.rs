//! Versioned project persistence.

mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::mock_data::MockDataSet;
use crate::core::tree::ConfigTree;

pub use sqlite::SqliteStore;

/// One immutable, numbered snapshot of a project's descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVersion {
    pub project_id: String,
    pub version: u64,
    #[serde(rename = "appConfig")]
    pub tree: ConfigTree,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: u64,
    pub created_at: String,
    pub page_count: usize,
    pub entity_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub seq: u64,
    pub step: String,
    pub event_type: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A completed step, recorded in the same commit as its output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub seq: u64,
    pub run_id: String,
    pub step: String,
    pub snapshot: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub project_id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The checkpoint half of a [`CommitBatch`]; its sequence number is
/// assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointWrite {
    pub run_id: String,
    pub step: String,
    pub snapshot: Value,
}

/// Writes that land together or not at all.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    /// The project's next config version. The number must be exactly one
    /// past the latest; anything else is a conflict and nothing is written.
    pub version: Option<(u64, ConfigTree)>,
    /// A full data snapshot alongside the given config version.
    pub mock_data: Option<(u64, MockDataSet)>,
    pub project_name: Option<String>,
    pub checkpoint: Option<CheckpointWrite>,
    pub message: Option<MessageRecord>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.mock_data.is_none()
            && self.project_name.is_none()
            && self.checkpoint.is_none()
            && self.message.is_none()
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn latest_version(&self, project_id: &str) -> Result<Option<ConfigVersion>>;

    async fn version(&self, project_id: &str, version: u64) -> Result<Option<ConfigVersion>>;

    async fn list_versions(&self, project_id: &str) -> Result<Vec<VersionInfo>>;

    /// Mock data current at the latest version.
    async fn mock_data(&self, project_id: &str) -> Result<Option<MockDataSet>>;

    /// Mock data current at `version`: the newest snapshot taken at or before it.
    async fn mock_data_at(&self, project_id: &str, version: u64) -> Result<Option<MockDataSet>>;

    /// Apply every write in `batch` in one transaction.
    async fn commit(&self, project_id: &str, batch: &CommitBatch) -> Result<()>;

    /// Log a message on its own. Messages that belong to a step's output go
    /// through [`ProjectStore::commit`] instead.
    async fn append_message(&self, project_id: &str, message: &MessageRecord) -> Result<()>;

    async fn list_messages(&self, project_id: &str, after: Option<u64>) -> Result<Vec<MessageRecord>>;

    async fn last_message_seq(&self, project_id: &str) -> Result<Option<u64>>;

    async fn list_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>>;

    async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;
}
