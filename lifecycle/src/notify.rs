//! Notification dispatch
//!
//! Notifications are fire-and-forget. The engine calls a [`Notifier`] only
//! after the decision it reports on has been committed, and a delivery
//! failure is logged and swallowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{LifecycleEvent, SharedEventBus};
use crate::state::{ActorId, ReportId};

/// Why a notification was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A worker received a new assignment
    WorkerAssigned,
    /// A report the recipient filed was closed
    ReportResolved,
    /// The recipient's proof was approved
    ProofApproved,
    /// The recipient's proof was rejected; they keep the work
    ProofRejected,
    /// The recipient was removed from the report
    WorkerRemoved,
}

/// A message addressed to one actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: ActorId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    /// Deep link into the client, if any
    pub link: Option<String>,
    pub report_id: Option<ReportId>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Notification about a report, linking to it
    pub fn for_report(
        recipient: impl Into<ActorId>,
        report_id: &str,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            title: title.into(),
            message: message.into(),
            kind,
            link: Some(format!("/reports/{}", report_id)),
            report_id: Some(report_id.to_string()),
            created_at: now,
        }
    }
}

/// Errors from a notification backend
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed for {recipient}: {reason}")]
    Delivery { recipient: ActorId, reason: String },

    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification channel
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Shared reference to a notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            kind = ?notification.kind,
            report_id = ?notification.report_id,
            title = %notification.title,
            "Notification"
        );
        Ok(())
    }
}

/// Publishes notifications onto the event bus for connected clients
pub struct BusNotifier {
    bus: SharedEventBus,
}

impl BusNotifier {
    pub fn new(bus: SharedEventBus) -> Self {
        Self { bus }
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        // Nobody listening is not a failure; the client re-fetches on connect
        self.bus.publish(LifecycleEvent::Notification {
            notification: notification.clone(),
        });
        Ok(())
    }
}

/// Deliver a notification, logging instead of propagating failure
pub(crate) fn dispatch(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification) {
        warn!(
            recipient = %notification.recipient,
            kind = ?notification.kind,
            error = %e,
            "Notification dispatch failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventBusExt, EventFilter};

    struct Broken;

    impl Notifier for Broken {
        fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("smtp down".to_string()))
        }
    }

    fn sample() -> Notification {
        Notification::for_report(
            "citizen-1",
            "r1",
            NotificationKind::ReportResolved,
            "Report resolved",
            "Your report has been closed",
            Utc::now(),
        )
    }

    #[test]
    fn test_for_report_links_to_report() {
        let n = sample();
        assert_eq!(n.link.as_deref(), Some("/reports/r1"));
        assert_eq!(n.report_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_dispatch_swallows_failure() {
        dispatch(&Broken, &sample());
        dispatch(&LogNotifier, &sample());
    }

    #[tokio::test]
    async fn test_bus_notifier_targets_recipient() {
        let bus = EventBus::new().shared();
        let mut mine = bus.subscribe_filtered(EventFilter::new().recipient("citizen-1"));
        let mut theirs = bus.subscribe_filtered(EventFilter::new().recipient("citizen-2"));

        BusNotifier::new(bus.clone()).notify(&sample()).unwrap();

        let event = mine.recv().await.unwrap();
        assert_eq!(event.recipient(), Some("citizen-1"));
        assert!(theirs.try_recv().is_err());
    }
}
