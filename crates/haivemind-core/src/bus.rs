//! Cache/Bus (CB) - the in-process publish/subscribe backbone every other
//! component communicates through. No component mutates another's state
//! directly (§5); state changes are published here and observed by whoever
//! cares (Sync Service mirrors to peers, Agent Registry fans broadcasts out).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::VectorClock;

/// What changed, so the Sync Service can mirror it to peers and other
/// in-process listeners (audit, search index maintenance) can react.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    MemoryStored {
        id: String,
        machine_id: String,
        vector_clock: VectorClock,
        occurred_at: DateTime<Utc>,
    },
    MemoryUpdated {
        id: String,
        machine_id: String,
        vector_clock: VectorClock,
        occurred_at: DateTime<Utc>,
    },
    MemorySoftDeleted {
        id: String,
        machine_id: String,
        vector_clock: VectorClock,
        delete_expires_at: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },
    MemoryPurged {
        id: String,
        machine_id: String,
        vector_clock: VectorClock,
        occurred_at: DateTime<Utc>,
    },
    AgentBroadcast {
        memory_id: String,
        from_agent_id: String,
        machine_id: String,
        vector_clock: VectorClock,
        occurred_at: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn id(&self) -> &str {
        match self {
            SyncEvent::MemoryStored { id, .. }
            | SyncEvent::MemoryUpdated { id, .. }
            | SyncEvent::MemorySoftDeleted { id, .. }
            | SyncEvent::MemoryPurged { id, .. } => id,
            SyncEvent::AgentBroadcast { memory_id, .. } => memory_id,
        }
    }

    pub fn machine_id(&self) -> &str {
        match self {
            SyncEvent::MemoryStored { machine_id, .. }
            | SyncEvent::MemoryUpdated { machine_id, .. }
            | SyncEvent::MemorySoftDeleted { machine_id, .. }
            | SyncEvent::MemoryPurged { machine_id, .. }
            | SyncEvent::AgentBroadcast { machine_id, .. } => machine_id,
        }
    }

    pub fn vector_clock(&self) -> &VectorClock {
        match self {
            SyncEvent::MemoryStored { vector_clock, .. }
            | SyncEvent::MemoryUpdated { vector_clock, .. }
            | SyncEvent::MemorySoftDeleted { vector_clock, .. }
            | SyncEvent::MemoryPurged { vector_clock, .. }
            | SyncEvent::AgentBroadcast { vector_clock, .. } => vector_clock,
        }
    }
}

/// Thin wrapper over a broadcast channel. Slow subscribers (the SSE
/// transport, a lagging sync worker) drop the oldest events rather than
/// blocking publishers; callers that need every event use `subscribe` and
/// poll promptly.
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: SyncEvent) {
        // No receivers is a normal state (no sync peers configured, no SSE
        // clients connected yet); broadcast::Sender::send only errors then.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(SyncEvent::MemoryStored {
            id: "m1".into(),
            machine_id: "node-a".into(),
            vector_clock: VectorClock::origin("node-a"),
            occurred_at: Utc::now(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id(), "m1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(SyncEvent::MemoryPurged {
            id: "m1".into(),
            machine_id: "node-a".into(),
            vector_clock: VectorClock::origin("node-a"),
            occurred_at: Utc::now(),
        });
    }
}
