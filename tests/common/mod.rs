#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Notify;

use appforge::core::generator::{
    GenerationContext, GenerationError, GenerationTask, Generator, StructuredResult, TemplateGenerator,
};
use appforge::core::mock_data::{MockDataSet, SynthOptions};
use appforge::core::pipeline::{PipelineSettings, Step};
use appforge::core::progress::{ProgressHub, RunEvent, SequencedEvent};
use appforge::core::service::{ForgeService, RunRequest};
use appforge::core::store::{
    Checkpoint, CommitBatch, ConfigVersion, MessageRecord, ProjectRecord, ProjectStore, SqliteStore,
    VersionInfo,
};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail this many calls with a retryable provider error, then recover.
    Flaky(u32),
    /// Never answer.
    Hang,
}

/// Holds a generator call until the test lets it through.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Template generator with per-task faults and a call log.
#[derive(Default)]
pub struct ScriptedGenerator {
    inner: TemplateGenerator,
    faults: Mutex<HashMap<&'static str, Fault>>,
    gates: Mutex<HashMap<&'static str, Gate>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flaky(self, task: GenerationTask, failures: u32) -> Self {
        self.set(task, Fault::Flaky(failures));
        self
    }

    pub fn hang(self, task: GenerationTask) -> Self {
        self.set(task, Fault::Hang);
        self
    }

    pub fn gated(self, task: GenerationTask, gate: Gate) -> Self {
        if let Ok(mut gates) = self.gates.lock() {
            gates.insert(task.as_str(), gate);
        }
        self
    }

    fn set(&self, task: GenerationTask, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(task.as_str(), fault);
        }
    }

    pub fn calls(&self, task: GenerationTask) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|t| **t == task.as_str()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Result<StructuredResult, GenerationError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ctx.task.as_str());
        }
        let gate = self
            .gates
            .lock()
            .ok()
            .and_then(|gates| gates.get(ctx.task.as_str()).cloned());
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let fault = self
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| match faults.get_mut(ctx.task.as_str()) {
                Some(Fault::Flaky(0)) | None => None,
                Some(Fault::Flaky(n)) => {
                    *n -= 1;
                    Some(Fault::Flaky(*n))
                }
                Some(Fault::Hang) => Some(Fault::Hang),
            });
        match fault {
            Some(Fault::Flaky(_)) => Err(GenerationError::Provider("upstream 503".into())),
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GenerationError::Provider("unreachable".into()))
            }
            None => self.inner.generate(ctx).await,
        }
    }
}

/// SQLite store whose writes can be made to fail, or held, on demand.
pub struct FlakyStore {
    inner: SqliteStore,
    pub fail_versions: AtomicBool,
    pub fail_mock_data: AtomicBool,
    fail_checkpoint: Mutex<Option<&'static str>>,
    fail_message: Mutex<Option<(&'static str, &'static str)>>,
    held_message: Mutex<Option<(&'static str, Gate)>>,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_versions: AtomicBool::new(false),
            fail_mock_data: AtomicBool::new(false),
            fail_checkpoint: Mutex::new(None),
            fail_message: Mutex::new(None),
            held_message: Mutex::new(None),
        }
    }

    /// Fail every commit that records a checkpoint for `step`.
    pub fn fail_checkpoint_at(&self, step: Step) {
        if let Ok(mut slot) = self.fail_checkpoint.lock() {
            *slot = Some(step.as_str());
        }
    }

    /// Fail every write of an `event_type` message for `step`.
    pub fn fail_message(&self, event_type: &'static str, step: Step) {
        if let Ok(mut slot) = self.fail_message.lock() {
            *slot = Some((event_type, step.as_str()));
        }
    }

    /// Hold the next logged `event_type` message until the gate opens.
    pub fn hold_next_message(&self, event_type: &'static str, gate: Gate) {
        if let Ok(mut slot) = self.held_message.lock() {
            *slot = Some((event_type, gate));
        }
    }

    fn checkpoint_fails(&self, step: &str) -> bool {
        self.fail_checkpoint
            .lock()
            .map(|slot| *slot == Some(step))
            .unwrap_or(false)
    }

    fn message_fails(&self, message: &MessageRecord) -> bool {
        self.fail_message
            .lock()
            .map(|slot| {
                slot.is_some_and(|(kind, step)| kind == message.event_type && step == message.step)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl ProjectStore for FlakyStore {
    async fn latest_version(&self, project_id: &str) -> Result<Option<ConfigVersion>> {
        self.inner.latest_version(project_id).await
    }

    async fn version(&self, project_id: &str, version: u64) -> Result<Option<ConfigVersion>> {
        self.inner.version(project_id, version).await
    }

    async fn list_versions(&self, project_id: &str) -> Result<Vec<VersionInfo>> {
        self.inner.list_versions(project_id).await
    }

    async fn mock_data(&self, project_id: &str) -> Result<Option<MockDataSet>> {
        self.inner.mock_data(project_id).await
    }

    async fn mock_data_at(&self, project_id: &str, version: u64) -> Result<Option<MockDataSet>> {
        self.inner.mock_data_at(project_id, version).await
    }

    async fn commit(&self, project_id: &str, batch: &CommitBatch) -> Result<()> {
        if batch.version.is_some() && self.fail_versions.load(Ordering::SeqCst) {
            bail!("disk I/O error");
        }
        if batch.mock_data.is_some() && self.fail_mock_data.load(Ordering::SeqCst) {
            bail!("disk I/O error");
        }
        if let Some(checkpoint) = &batch.checkpoint
            && self.checkpoint_fails(&checkpoint.step)
        {
            bail!("disk I/O error");
        }
        if let Some(message) = &batch.message
            && self.message_fails(message)
        {
            bail!("disk I/O error");
        }
        self.inner.commit(project_id, batch).await
    }

    async fn append_message(&self, project_id: &str, message: &MessageRecord) -> Result<()> {
        let gate = match self.held_message.lock() {
            Ok(mut slot) if slot.as_ref().is_some_and(|(kind, _)| *kind == message.event_type) => {
                slot.take().map(|(_, gate)| gate)
            }
            _ => None,
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.message_fails(message) {
            bail!("disk I/O error");
        }
        self.inner.append_message(project_id, message).await
    }

    async fn list_messages(&self, project_id: &str, after: Option<u64>) -> Result<Vec<MessageRecord>> {
        self.inner.list_messages(project_id, after).await
    }

    async fn last_message_seq(&self, project_id: &str) -> Result<Option<u64>> {
        self.inner.last_message_seq(project_id).await
    }

    async fn list_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        self.inner.list_checkpoints(project_id).await
    }

    async fn project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        self.inner.project(project_id).await
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        timeout: Duration::from_secs(5),
        max_retries: 2,
        backoff: Duration::from_millis(5),
        synth: SynthOptions::default(),
        seed: Some(7),
    }
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn service_with(
    generator: Arc<dyn Generator>,
    store: Arc<dyn ProjectStore>,
    settings: PipelineSettings,
) -> ForgeService {
    ForgeService::new(generator, store, Arc::new(ProgressHub::new()), settings)
}

pub fn template_service() -> ForgeService {
    service_with(Arc::new(TemplateGenerator::new()), memory_store(), settings())
}

/// Run a create to completion and return the new project's id.
pub async fn create_project(service: &ForgeService, instruction: &str) -> String {
    let outcome = service
        .run_to_completion(RunRequest::new(
            appforge::core::pipeline::RunMode::Create,
            instruction,
        ))
        .await
        .unwrap();
    assert!(outcome.is_success(), "create failed: {:?}", outcome.error);
    outcome.project_id
}

pub fn events(service: &ForgeService, project_id: &str) -> Vec<SequencedEvent> {
    service.coordinator().hub().history(project_id, None)
}

/// Follow the project's channel from `after` until a run ends.
pub async fn wait_for_terminal(service: &ForgeService, project_id: &str, after: Option<u64>) -> RunEvent {
    let mut sub = service.subscribe(project_id, after).await.unwrap().unwrap();
    loop {
        let event = sub.next().await.unwrap().event;
        if event.is_terminal() {
            return event;
        }
    }
}

pub fn last_seq(service: &ForgeService, project_id: &str) -> Option<u64> {
    events(service, project_id).last().map(|e| e.seq)
}

/// The events of the last run only: everything after the previous terminal event.
pub fn last_run_events(service: &ForgeService, project_id: &str) -> Vec<RunEvent> {
    let all = events(service, project_id);
    let start = all[..all.len().saturating_sub(1)]
        .iter()
        .rposition(|e| e.event.is_terminal())
        .map(|i| i + 1)
        .unwrap_or(0);
    all[start..].iter().map(|e| e.event.clone()).collect()
}
