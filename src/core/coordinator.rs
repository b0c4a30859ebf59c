//! Commit-then-publish. Every state-producing step hands its result here;
//! the coordinator writes it to the store first and only then puts the
//! event on the project's channel.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::error::RunError;
use crate::core::pipeline::Step;
use crate::core::progress::{ProgressHub, RunEvent, SequencedEvent, Subscription, load_events};
use crate::core::runs::RunLease;
use crate::core::store::{CheckpointWrite, CommitBatch, MessageRecord, ProjectStore};

#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn ProjectStore>,
    hub: Arc<ProgressHub>,
    // Held from sequence assignment to delivery.
    publish_lock: Arc<Mutex<()>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn ProjectStore>, hub: Arc<ProgressHub>) -> Self {
        Self {
            store,
            hub,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    /// Load the tail of the persisted message log into the hub the first
    /// time a project is touched in this process, so sequence numbers
    /// continue and late subscribers can replay earlier runs.
    async fn ensure_seeded(&self, project_id: &str) -> anyhow::Result<()> {
        if self.hub.has_channel(project_id) {
            return Ok(());
        }
        let last = self.store.last_message_seq(project_id).await?;
        let events = match last {
            Some(last) => {
                let from = last.saturating_sub(self.hub.history_limit() as u64);
                load_events(self.store.as_ref(), project_id, Some(from)).await?
            }
            None => Vec::new(),
        };
        if !events.is_empty() {
            debug!("Seeded {} events for project {}", events.len(), project_id);
        }
        self.hub.seed(project_id, last.unwrap_or(0), events);
        Ok(())
    }

    /// Log the event, run `on_logged`, then deliver. The caller holds the
    /// publish lock.
    async fn publish_locked(
        &self,
        project_id: &str,
        event: RunEvent,
        on_logged: impl FnOnce() + Send,
    ) -> Result<SequencedEvent, RunError> {
        self.ensure_seeded(project_id)
            .await
            .map_err(RunError::persistence)?;
        let seq = self.hub.next_seq(project_id);
        let record = to_record(seq, &event).map_err(RunError::persistence)?;
        self.store
            .append_message(project_id, &record)
            .await
            .map_err(RunError::persistence)?;
        on_logged();
        let sequenced = SequencedEvent { seq, event };
        self.hub.deliver(project_id, sequenced.clone());
        Ok(sequenced)
    }

    /// Append the event to the message log, then deliver it.
    pub async fn publish(&self, project_id: &str, event: RunEvent) -> Result<SequencedEvent, RunError> {
        let _guard = self.publish_lock.lock().await;
        self.publish_locked(project_id, event, || {}).await
    }

    /// Commit a finished step. Its writes, its checkpoint and its `state`
    /// event go to the store in one transaction; the event is delivered
    /// only after that transaction.
    pub async fn commit_step(
        &self,
        project_id: &str,
        run_id: &str,
        step: Step,
        snapshot: Value,
        mut writes: CommitBatch,
        data: Value,
    ) -> Result<SequencedEvent, RunError> {
        let _guard = self.publish_lock.lock().await;
        self.ensure_seeded(project_id)
            .await
            .map_err(RunError::persistence)?;
        let seq = self.hub.next_seq(project_id);
        let event = RunEvent::State { step, data };
        writes.checkpoint = Some(CheckpointWrite {
            run_id: run_id.to_string(),
            step: step.as_str().to_string(),
            snapshot,
        });
        writes.message = Some(to_record(seq, &event).map_err(RunError::persistence)?);
        self.store
            .commit(project_id, &writes)
            .await
            .map_err(RunError::persistence)?;
        if let Some((version, _)) = &writes.version {
            debug!("Committed {} v{}", project_id, version);
        }
        let sequenced = SequencedEvent { seq, event };
        self.hub.deliver(project_id, sequenced.clone());
        Ok(sequenced)
    }

    /// Publish a run's terminal event and give up its lease.
    ///
    /// The lease goes once the event is logged and before it is delivered,
    /// all under the publish lock: nobody sees the run end while it still
    /// owns the project, and the next run cannot publish ahead of it. If the
    /// event cannot be logged, an `error` event for the same step takes its
    /// place and the logging failure is returned.
    pub async fn finish(
        &self,
        project_id: &str,
        event: RunEvent,
        lease: RunLease,
    ) -> Result<SequencedEvent, RunError> {
        let _guard = self.publish_lock.lock().await;
        let mut lease = Some(lease);
        let failure = match self
            .publish_locked(project_id, event.clone(), || drop(lease.take()))
            .await
        {
            Ok(sequenced) => return Ok(sequenced),
            Err(e) => e,
        };
        warn!("Could not log the end of the run for {}: {}", project_id, failure);

        let retry = !matches!(event, RunEvent::Error { .. });
        let fallback = if retry {
            RunEvent::Error {
                step: event.step(),
                error: failure.to_string(),
            }
        } else {
            event
        };
        if retry
            && self
                .publish_locked(project_id, fallback.clone(), || drop(lease.take()))
                .await
                .is_ok()
        {
            return Err(failure);
        }
        // Nothing could be logged; subscribers still learn the run ended.
        drop(lease);
        self.hub.publish(project_id, fallback);
        Err(failure)
    }

    /// Follow a project's channel from `after`. A project with nothing in
    /// its message log is only followed while `run_active` says a run is
    /// about to publish to it; otherwise it is unknown, `None` comes back
    /// and no channel is created.
    pub async fn subscribe(
        &self,
        project_id: &str,
        after: Option<u64>,
        run_active: bool,
    ) -> anyhow::Result<Option<Subscription>> {
        if !self.hub.has_channel(project_id) {
            let _guard = self.publish_lock.lock().await;
            let logged = self.store.last_message_seq(project_id).await?.is_some();
            if !logged && !run_active {
                debug!("Not following unknown project {}", project_id);
                return Ok(None);
            }
            self.ensure_seeded(project_id).await?;
        }
        let subscription = self
            .hub
            .subscribe(project_id, after)
            .ok_or_else(|| anyhow::anyhow!("Progress channel for {} is unavailable", project_id))?;
        Ok(Some(subscription.with_log(self.store.clone())))
    }
}

fn to_record(seq: u64, event: &RunEvent) -> anyhow::Result<MessageRecord> {
    Ok(MessageRecord {
        seq,
        step: event.step().as_str().to_string(),
        event_type: event.event_type().to_string(),
        payload: serde_json::to_value(event)?,
        created_at: None,
    })
}
