use crate::{ImageSlot, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type PredictionId = Uuid;

/// Events emitted while a prediction runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PredictionEvent {
    PredictionStarted {
        prediction_id: PredictionId,
        seed: u64,
        timestamp: DateTime<Utc>,
    },
    PredictionCompleted {
        prediction_id: PredictionId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    Progress {
        prediction_id: PredictionId,
        event: ProgressEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Steps within a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ProgressEvent {
    InputStaged { slot: ImageSlot, filename: String },
    WorkflowQueued { prompt_id: String },
    NodeExecuted { node_id: NodeId },
    OutputWritten { path: PathBuf },
    Info { message: String },
    Warning { message: String },
}

/// Emitter bound to one prediction
#[derive(Clone)]
pub struct EventEmitter {
    prediction_id: PredictionId,
    sender: broadcast::Sender<PredictionEvent>,
}

impl EventEmitter {
    pub fn new(prediction_id: PredictionId, sender: broadcast::Sender<PredictionEvent>) -> Self {
        Self {
            prediction_id,
            sender,
        }
    }

    /// Emitter with no subscribers; events are dropped
    pub fn detached() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(PredictionId::nil(), sender)
    }

    pub fn prediction_id(&self) -> PredictionId {
        self.prediction_id
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(PredictionEvent::Progress {
            prediction_id: self.prediction_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Warning {
            message: message.into(),
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<PredictionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PredictionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PredictionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, prediction_id: PredictionId) -> EventEmitter {
        EventEmitter::new(prediction_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
