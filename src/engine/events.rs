use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::error::EngineError;

/// Upper bound on concurrently registered listeners.
pub const MAX_LISTENERS: usize = 32;

/// Per-listener buffer; a listener that falls further behind loses events.
const LISTENER_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    Start,
    TaskStart,
    TaskOutput,
    TaskComplete,
    TaskFailed,
    TaskBlocked,
    Stop,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl EngineEvent {
    pub fn new(kind: EngineEventKind) -> Self {
        Self {
            kind,
            task_id: None,
            data: None,
        }
    }

    pub fn for_task(kind: EngineEventKind, task_id: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: Some(task_id.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub type ListenerId = u64;

#[derive(Debug)]
pub struct Subscription {
    pub id: ListenerId,
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Fan-out of engine events to registered listeners.
///
/// Emission never blocks: a full listener misses the event, a closed one is
/// dropped from the list.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, mpsc::Sender<EngineEvent>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Result<Subscription, EngineError> {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.retain(|(_, tx)| !tx.is_closed());
        if listeners.len() >= MAX_LISTENERS {
            return Err(EngineError::TooManyListeners(MAX_LISTENERS));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        listeners.push((id, tx));
        Ok(Subscription { id, events: rx })
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    pub fn emit(&self, event: EngineEvent) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(listener = id, kind = ?event.kind, "listener lagging, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}
