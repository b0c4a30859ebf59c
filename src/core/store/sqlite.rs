use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    Checkpoint, CommitBatch, ConfigVersion, MessageRecord, ProjectRecord, ProjectStore, VersionInfo,
};
use crate::core::mock_data::{MockDataSet, Record};
use crate::core::tree::ConfigTree;

/// SQLite-backed project store. One connection, serialized behind a mutex.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        info!("Opened project store at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS configs (
            project_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            config_json TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project_id, version)
        )",
        [],
    )?;

    // One row per resource; `mock_snapshots` marks which versions carry a
    // snapshot so an empty data set is still distinguishable from none.
    db.execute(
        "CREATE TABLE IF NOT EXISTS mock_snapshots (
            project_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project_id, version)
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS mock_data (
            project_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            resource_name TEXT NOT NULL,
            data_json TEXT NOT NULL,
            PRIMARY KEY (project_id, version, resource_name)
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            project_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            step TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project_id, seq)
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS run_steps (
            project_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            step TEXT NOT NULL,
            snapshot_json TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (project_id, seq)
        )",
        [],
    )?;

    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_run_steps_run ON run_steps(run_id)",
        [],
    )?;

    Ok(())
}

fn load_snapshot(db: &Connection, project_id: &str, version: i64) -> Result<MockDataSet> {
    let mut stmt = db.prepare(
        "SELECT resource_name, data_json FROM mock_data
         WHERE project_id = ?1 AND version = ?2
         ORDER BY resource_name",
    )?;
    let rows = stmt.query_map(params![project_id, version], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut data = MockDataSet::default();
    for row in rows {
        let (resource, json) = row?;
        let records: Vec<Record> = serde_json::from_str(&json)
            .with_context(|| format!("Corrupt mock data for resource '{}'", resource))?;
        data.insert(&resource, records);
    }
    Ok(data)
}

fn row_to_version(project_id: &str, version: i64, json: &str, created_at: String) -> Result<ConfigVersion> {
    let tree: ConfigTree = serde_json::from_str(json)
        .with_context(|| format!("Corrupt config for {} v{}", project_id, version))?;
    Ok(ConfigVersion {
        project_id: project_id.to_string(),
        version: version as u64,
        tree,
        created_at,
    })
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn latest_version(&self, project_id: &str) -> Result<Option<ConfigVersion>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT version, config_json, created_at FROM configs
                 WHERE project_id = ?1 ORDER BY version DESC LIMIT 1",
                params![project_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((version, json, created_at)) => {
                Ok(Some(row_to_version(project_id, version, &json, created_at)?))
            }
            None => Ok(None),
        }
    }

    async fn version(&self, project_id: &str, version: u64) -> Result<Option<ConfigVersion>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT config_json, created_at FROM configs WHERE project_id = ?1 AND version = ?2",
        )?;
        let mut rows = stmt.query(params![project_id, version as i64])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            let created_at: String = row.get(1)?;
            return Ok(Some(row_to_version(project_id, version as i64, &json, created_at)?));
        }
        Ok(None)
    }

    async fn list_versions(&self, project_id: &str) -> Result<Vec<VersionInfo>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT version, config_json, created_at FROM configs
             WHERE project_id = ?1 ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut versions = Vec::new();
        for row in rows {
            let (version, json, created_at) = row?;
            let tree = row_to_version(project_id, version, &json, created_at.clone())?.tree;
            versions.push(VersionInfo {
                version: version as u64,
                created_at,
                page_count: tree.pages.len(),
                entity_count: tree.entities.len(),
            });
        }
        Ok(versions)
    }

    async fn mock_data(&self, project_id: &str) -> Result<Option<MockDataSet>> {
        self.mock_data_at(project_id, i64::MAX as u64).await
    }

    async fn mock_data_at(&self, project_id: &str, version: u64) -> Result<Option<MockDataSet>> {
        let version = i64::try_from(version).unwrap_or(i64::MAX);
        let db = self.db.lock().await;
        let snapshot: Option<i64> = db
            .query_row(
                "SELECT MAX(version) FROM mock_snapshots WHERE project_id = ?1 AND version <= ?2",
                params![project_id, version],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        match snapshot {
            Some(v) => Ok(Some(load_snapshot(&db, project_id, v)?)),
            None => Ok(None),
        }
    }

    async fn commit(&self, project_id: &str, batch: &CommitBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let config_json = match &batch.version {
            Some((_, tree)) => Some(serde_json::to_string(tree)?),
            None => None,
        };
        let mut data_rows = Vec::new();
        if let Some((_, data)) = &batch.mock_data {
            for (resource, records) in &data.0 {
                data_rows.push((resource.clone(), serde_json::to_string(records)?));
            }
        }
        let snapshot_json = match &batch.checkpoint {
            Some(checkpoint) => Some(serde_json::to_string(&checkpoint.snapshot)?),
            None => None,
        };
        let payload_json = match &batch.message {
            Some(message) => Some(serde_json::to_string(&message.payload)?),
            None => None,
        };

        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let (Some((version, _)), Some(json)) = (&batch.version, &config_json) {
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM configs WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            if next != *version as i64 {
                bail!(
                    "version conflict for {}: expected to write v{} but the next version is v{}",
                    project_id,
                    version,
                    next
                );
            }
            tx.execute(
                "INSERT INTO configs (project_id, version, config_json) VALUES (?1, ?2, ?3)",
                params![project_id, next, json],
            )?;
        }

        if let Some((version, _)) = &batch.mock_data {
            let version = *version as i64;
            tx.execute(
                "DELETE FROM mock_data WHERE project_id = ?1 AND version = ?2",
                params![project_id, version],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO mock_snapshots (project_id, version) VALUES (?1, ?2)",
                params![project_id, version],
            )?;
            for (resource, json) in &data_rows {
                tx.execute(
                    "INSERT INTO mock_data (project_id, version, resource_name, data_json)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![project_id, version, resource, json],
                )?;
            }
        }

        if let Some(name) = &batch.project_name {
            tx.execute(
                "INSERT INTO projects (project_id, name) VALUES (?1, ?2)
                 ON CONFLICT(project_id) DO UPDATE SET name = excluded.name, updated_at = CURRENT_TIMESTAMP",
                params![project_id, name],
            )?;
        }

        if let (Some(checkpoint), Some(json)) = (&batch.checkpoint, &snapshot_json) {
            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM run_steps WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO run_steps (project_id, seq, run_id, step, snapshot_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![project_id, seq, checkpoint.run_id, checkpoint.step, json],
            )?;
        }

        if let (Some(message), Some(payload)) = (&batch.message, &payload_json) {
            tx.execute(
                "INSERT INTO messages (project_id, seq, step, event_type, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project_id,
                    message.seq as i64,
                    message.step,
                    message.event_type,
                    payload
                ],
            )?;
        }

        tx.commit()?;
        debug!(
            "Committed batch for {} (version {:?}, data {:?}, {} resources)",
            project_id,
            batch.version.as_ref().map(|(v, _)| *v),
            batch.mock_data.as_ref().map(|(v, _)| *v),
            data_rows.len()
        );
        Ok(())
    }

    async fn append_message(&self, project_id: &str, message: &MessageRecord) -> Result<()> {
        let payload = serde_json::to_string(&message.payload)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO messages (project_id, seq, step, event_type, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project_id,
                message.seq as i64,
                message.step,
                message.event_type,
                payload
            ],
        )?;
        Ok(())
    }

    async fn list_messages(&self, project_id: &str, after: Option<u64>) -> Result<Vec<MessageRecord>> {
        let after = after.map(|a| a as i64).unwrap_or(0);
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT seq, step, event_type, payload_json, created_at FROM messages
             WHERE project_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![project_id, after], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (seq, step, event_type, payload, created_at) = row?;
            messages.push(MessageRecord {
                seq: seq as u64,
                step,
                event_type,
                payload: serde_json::from_str(&payload)?,
                created_at,
            });
        }
        Ok(messages)
    }

    async fn last_message_seq(&self, project_id: &str) -> Result<Option<u64>> {
        let db = self.db.lock().await;
        let seq: Option<i64> = db.query_row(
            "SELECT MAX(seq) FROM messages WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(seq.map(|s| s as u64))
    }

    async fn list_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT seq, run_id, step, snapshot_json FROM run_steps
             WHERE project_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut checkpoints = Vec::new();
        for row in rows {
            let (seq, run_id, step, snapshot) = row?;
            checkpoints.push(Checkpoint {
                seq: seq as u64,
                run_id,
                step,
                snapshot: serde_json::from_str(&snapshot)?,
            });
        }
        Ok(checkpoints)
    }

    async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT project_id, name, created_at, updated_at FROM projects WHERE project_id = ?1",
                params![project_id],
                |row| {
                    Ok(ProjectRecord {
                        project_id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
