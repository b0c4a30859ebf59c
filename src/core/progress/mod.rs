//! Per-project, replayable progress channels.
//!
//! Every project has one ordered history. A subscriber gets the history
//! after the sequence number it already has, then live events, with no gap
//! between the two: the snapshot and the broadcast subscription are taken
//! under the same lock that delivery holds. Only the newest events stay in
//! memory; older ones are read back from the message log.

mod event;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::core::store::ProjectStore;

pub use event::{RunEvent, SequencedEvent};

const CHANNEL_CAPACITY: usize = 256;
/// Events each project keeps in memory.
const HISTORY_LIMIT: usize = 128;

struct ChannelState {
    history: VecDeque<SequencedEvent>,
    last_seq: u64,
}

struct Channel {
    state: Mutex<ChannelState>,
    tx: broadcast::Sender<SequencedEvent>,
    history_limit: usize,
}

impl Channel {
    fn new(capacity: usize, history_limit: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(ChannelState {
                history: VecDeque::new(),
                last_seq: 0,
            }),
            tx,
            history_limit,
        }
    }

    fn after(&self, after: u64) -> VecDeque<SequencedEvent> {
        match self.state.lock() {
            Ok(state) => state
                .history
                .iter()
                .filter(|e| e.seq > after)
                .cloned()
                .collect(),
            Err(_) => VecDeque::new(),
        }
    }
}

pub struct ProgressHub {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    capacity: usize,
    history_limit: usize,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::with_limits(CHANNEL_CAPACITY, HISTORY_LIMIT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, HISTORY_LIMIT)
    }

    /// `capacity` bounds the live broadcast buffer, `history_limit` the
    /// replayable tail kept in memory.
    pub fn with_limits(capacity: usize, history_limit: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    fn channel(&self, project_id: &str) -> Option<Arc<Channel>> {
        self.channels.lock().ok()?.get(project_id).cloned()
    }

    fn open(&self, project_id: &str) -> Option<Arc<Channel>> {
        let mut channels = self.channels.lock().ok()?;
        let channel = channels
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Channel::new(self.capacity, self.history_limit)));
        Some(channel.clone())
    }

    pub fn has_channel(&self, project_id: &str) -> bool {
        self.channels
            .lock()
            .map(|c| c.contains_key(project_id))
            .unwrap_or(false)
    }

    /// Load a persisted history into a channel that does not exist yet.
    /// `last_seq` is the newest logged sequence number; only the newest
    /// `history_limit` events are kept. Returns false when the channel was
    /// already there.
    pub fn seed(&self, project_id: &str, last_seq: u64, mut events: Vec<SequencedEvent>) -> bool {
        let Ok(mut channels) = self.channels.lock() else {
            return false;
        };
        if channels.contains_key(project_id) {
            return false;
        }
        events.sort_by_key(|e| e.seq);
        events.dedup_by_key(|e| e.seq);
        let excess = events.len().saturating_sub(self.history_limit);
        let channel = Channel::new(self.capacity, self.history_limit);
        if let Ok(mut state) = channel.state.lock() {
            state.last_seq = events.last().map(|e| e.seq).unwrap_or(0).max(last_seq);
            state.history = events.into_iter().skip(excess).collect();
        }
        channels.insert(project_id.to_string(), Arc::new(channel));
        true
    }

    /// The sequence number the next event for this project will carry.
    pub fn next_seq(&self, project_id: &str) -> u64 {
        self.last_seq(project_id).unwrap_or(0) + 1
    }

    /// Sequence number of the newest event delivered, if any.
    pub fn last_seq(&self, project_id: &str) -> Option<u64> {
        self.channel(project_id)
            .and_then(|c| c.state.lock().ok().map(|s| s.last_seq))
            .filter(|seq| *seq > 0)
    }

    /// Append an already-sequenced event and fan it out. Events at or below
    /// the channel's last sequence number are dropped.
    pub fn deliver(&self, project_id: &str, event: SequencedEvent) -> bool {
        let Some(channel) = self.open(project_id) else {
            return false;
        };
        let Ok(mut state) = channel.state.lock() else {
            return false;
        };
        if event.seq <= state.last_seq {
            warn!(
                "Dropping out-of-order event {} for project {} (last {})",
                event.seq, project_id, state.last_seq
            );
            return false;
        }
        state.last_seq = event.seq;
        state.history.push_back(event.clone());
        while state.history.len() > channel.history_limit {
            state.history.pop_front();
        }
        // No receivers is fine; the history keeps it.
        let _ = channel.tx.send(event);
        true
    }

    /// Sequence and deliver `event`.
    pub fn publish(&self, project_id: &str, event: RunEvent) -> SequencedEvent {
        let sequenced = SequencedEvent {
            seq: self.next_seq(project_id),
            event,
        };
        self.deliver(project_id, sequenced.clone());
        sequenced
    }

    /// The in-memory tail after `after`. Never creates a channel.
    pub fn history(&self, project_id: &str, after: Option<u64>) -> Vec<SequencedEvent> {
        self.channel(project_id)
            .map(|c| Vec::from(c.after(after.unwrap_or(0))))
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.channel(project_id)
            .map(|c| c.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Replay the in-memory tail after `after`, then follow live delivery.
    pub fn subscribe(&self, project_id: &str, after: Option<u64>) -> Option<Subscription> {
        let channel = self.open(project_id)?;
        let after = after.unwrap_or(0);
        let (rx, backlog) = {
            let state = channel.state.lock().ok()?;
            let rx = channel.tx.subscribe();
            let backlog: VecDeque<SequencedEvent> = state
                .history
                .iter()
                .filter(|e| e.seq > after)
                .cloned()
                .collect();
            (rx, backlog)
        };
        debug!(
            "Subscriber joined project {} after seq {} ({} to replay)",
            project_id,
            after,
            backlog.len()
        );
        Some(Subscription {
            project_id: project_id.to_string(),
            backlog,
            rx,
            last_seq: after,
            channel,
            log: None,
        })
    }
}

/// Parse the persisted message log after `after` back into events.
pub async fn load_events(
    store: &dyn ProjectStore,
    project_id: &str,
    after: Option<u64>,
) -> anyhow::Result<Vec<SequencedEvent>> {
    let mut events = Vec::new();
    for message in store.list_messages(project_id, after).await? {
        match serde_json::from_value::<RunEvent>(message.payload) {
            Ok(event) => events.push(SequencedEvent {
                seq: message.seq,
                event,
            }),
            Err(e) => warn!("Skipping unreadable message {} of {}: {}", message.seq, project_id, e),
        }
    }
    Ok(events)
}

/// One subscriber's view of a project channel.
pub struct Subscription {
    project_id: String,
    backlog: VecDeque<SequencedEvent>,
    rx: broadcast::Receiver<SequencedEvent>,
    last_seq: u64,
    channel: Arc<Channel>,
    log: Option<Arc<dyn ProjectStore>>,
}

impl Subscription {
    /// Read events that fell out of the in-memory tail from `log`.
    pub fn with_log(mut self, log: Arc<dyn ProjectStore>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Next event in order, or `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<SequencedEvent> {
        loop {
            self.backfill().await;
            if let Some(event) = self.backlog.pop_front() {
                if event.seq <= self.last_seq {
                    continue;
                }
                self.last_seq = event.seq;
                return Some(event);
            }
            match self.rx.recv().await {
                Ok(event) if event.seq <= self.last_seq => continue,
                Ok(event) => {
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged by {}, refilling from history", skipped);
                    self.backlog = self.channel.after(self.last_seq);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Fill the gap between `last_seq` and the front of the backlog from the
    /// message log. Nothing is touched until the read has finished.
    async fn backfill(&mut self) {
        let Some(front) = self.backlog.front().map(|e| e.seq) else {
            return;
        };
        if front <= self.last_seq + 1 {
            return;
        }
        let Some(log) = self.log.clone() else {
            return;
        };
        match load_events(log.as_ref(), &self.project_id, Some(self.last_seq)).await {
            Ok(older) => {
                let missing: Vec<SequencedEvent> =
                    older.into_iter().filter(|e| e.seq < front).collect();
                debug!(
                    "Replaying {} events of {} from the message log",
                    missing.len(),
                    self.project_id
                );
                for event in missing.into_iter().rev() {
                    self.backlog.push_front(event);
                }
            }
            Err(e) => warn!("Could not read the message log of {}: {}", self.project_id, e),
        }
    }

    /// Pump the subscription into a stream, for SSE bodies. The pump ends
    /// when the stream is dropped, even if the project stays idle.
    pub fn into_stream(mut self) -> ReceiverStream<SequencedEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = self.next() => {
                        let Some(event) = event else { break };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Stream for {} closed at seq {}", self.project_id, self.last_seq);
        });
        ReceiverStream::new(rx)
    }
}
