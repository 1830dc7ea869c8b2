//! Event bus seam
//!
//! Transitions publish fire-and-forget domain events consumed by
//! out-of-core listeners (billing, statistics, chat). Publication
//! must never fail the triggering operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Domain events emitted by the booking core
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    JobCreated {
        job_id: Uuid,
    },
    JobCanceled {
        job_id: Uuid,
    },
    SessionEnded {
        job_id: Uuid,
        /// The party that did not initiate the end call
        notified_party: Uuid,
    },
}

/// Trait for event publication
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// In-process bus over an unbounded channel
pub struct ChannelEventBus {
    sender: mpsc::UnboundedSender<DomainEvent>,
}

impl ChannelEventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    async fn publish(&self, event: DomainEvent) {
        // receiver may be gone; publication is best-effort
        if self.sender.send(event).is_err() {
            tracing::debug!("Event bus has no listener, event dropped");
        }
    }
}

/// Bus that drops every event
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, _event: DomainEvent) {}
}
