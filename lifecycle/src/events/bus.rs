//! Event bus for the realtime feed
//!
//! Provides pub/sub messaging using Tokio broadcast channels. Publishing never
//! blocks and never fails the operation that produced the event.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::LifecycleEvent;
use crate::state::Channel;

/// Default channel capacity for broadcast
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast event bus
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a new event bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus buffering up to `capacity` events per receiver
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                0
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription.
///
/// A filter with a channel only passes messages posted to that channel; a
/// filter with `include_messages == false` passes no messages at all.
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Only events concerning this report
    pub report_id: Option<String>,
    /// Only notifications for this recipient
    pub recipient: Option<String>,
    /// Only these event types
    pub event_types: Option<Vec<String>>,
    /// Only messages of this channel
    pub channel: Option<Channel>,
    /// Whether message events pass at all
    pub include_messages: bool,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self {
            report_id: None,
            recipient: None,
            event_types: None,
            channel: None,
            include_messages: true,
        }
    }

    /// Filter by report ID
    pub fn report(mut self, report_id: &str) -> Self {
        self.report_id = Some(report_id.to_string());
        self
    }

    /// Filter notifications by recipient
    pub fn recipient(mut self, actor_id: &str) -> Self {
        self.recipient = Some(actor_id.to_string());
        self.event_types = Some(vec!["notification".to_string()]);
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Restrict to messages posted in one channel
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self.include_messages = true;
        self
    }

    /// Drop message events
    pub fn without_messages(mut self) -> Self {
        self.include_messages = false;
        self.channel = None;
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        if let Some(ref rid) = self.report_id {
            if event.report_id() != Some(rid.as_str()) {
                return false;
            }
        }

        if let Some(ref recipient) = self.recipient {
            if event.recipient() != Some(recipient.as_str()) {
                return false;
            }
        }

        match (event.channel(), self.channel) {
            (Some(_), _) if !self.include_messages => return false,
            (Some(actual), Some(wanted)) if actual != wanted => return false,
            (None, Some(_)) => return false,
            _ => {}
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<LifecycleEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event.
    ///
    /// `RecvError::Lagged` is passed through; the caller should re-fetch
    /// current state from the store.
    pub async fn recv(&mut self) -> Result<LifecycleEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Result<LifecycleEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
