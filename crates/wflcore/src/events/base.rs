use crate::{RunId, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while launching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LaunchEvent {
    RunCreated {
        run_id: RunId,
        entry: String,
        row: usize,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        run_id: RunId,
        from: RunState,
        to: RunState,
        timestamp: DateTime<Utc>,
    },
    Executing {
        run_id: RunId,
        command: String,
        timestamp: DateTime<Utc>,
    },
    Message {
        run_id: RunId,
        message: RunMessage,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl LaunchEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            LaunchEvent::RunCreated { run_id, .. }
            | LaunchEvent::StateChanged { run_id, .. }
            | LaunchEvent::Executing { run_id, .. }
            | LaunchEvent::Message { run_id, .. }
            | LaunchEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

/// Free-form messages from launchers and stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "level")]
pub enum RunMessage {
    Info { message: String },
    Warning { message: String },
}

/// Per-run emitter handed to launchers
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    sender: broadcast::Sender<LaunchEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, sender: broadcast::Sender<LaunchEvent>) -> Self {
        Self { run_id, sender }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn emit(&self, message: RunMessage) {
        let _ = self.sender.send(LaunchEvent::Message {
            run_id: self.run_id,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(RunMessage::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(RunMessage::Warning {
            message: message.into(),
        });
    }

    pub fn state_changed(&self, from: RunState, to: RunState) {
        let _ = self.sender.send(LaunchEvent::StateChanged {
            run_id: self.run_id,
            from,
            to,
            timestamp: Utc::now(),
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<LaunchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LaunchEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LaunchEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: RunId) -> EventEmitter {
        EventEmitter::new(run_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn emitter_tags_events_with_run() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();
        let emitter = bus.create_emitter(run_id);

        emitter.state_changed(RunState::Created, RunState::Staged);
        emitter.warn("excluded notes.txt");

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, LaunchEvent::StateChanged { to: RunState::Staged, .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.run_id(), run_id);
        assert!(matches!(
            second,
            LaunchEvent::Message { message: RunMessage::Warning { .. }, .. }
        ));
    }
}
