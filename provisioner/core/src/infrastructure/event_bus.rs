// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Provisioning Events
//
// Provides in-memory event streaming using tokio broadcast channels so
// observers (CLI streaming, audit sinks) can follow sagas in real time.
// In-memory only: events are lost on restart.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::ProvisioningEvent;

/// Event bus for publishing and subscribing to provisioning events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ProvisioningEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity determines how many events can be buffered before dropping
    /// old ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ProvisioningEvent) {
        debug!("Publishing event: {:?}", event);
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all provisioning events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single share. Useful for streaming the
    /// progress of one provisioning request.
    pub fn subscribe_share(&self, share_name: impl Into<String>) -> ShareEventReceiver {
        ShareEventReceiver {
            receiver: self.sender.subscribe(),
            share_name: share_name.into(),
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all provisioning events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ProvisioningEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<ProvisioningEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ProvisioningEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single share's events
pub struct ShareEventReceiver {
    receiver: broadcast::Receiver<ProvisioningEvent>,
    share_name: String,
}

impl ShareEventReceiver {
    /// Receive the next event for the subscribed share, skipping events
    /// that belong to other shares or to no share at all
    pub async fn recv(&mut self) -> Result<ProvisioningEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if event.share_name() == Some(self.share_name.as_str()) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
