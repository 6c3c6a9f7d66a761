//! Event types for the realtime feed
//!
//! Events are published after the corresponding store commit succeeds. They
//! are notifications only: a subscriber that lags or reconnects re-fetches
//! from the store instead of replaying events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::Notification;
use crate::state::{
    ActorId, Channel, EscalationId, Message, Priority, ProofId, ReportId, ReportStatus, Severity,
    VerificationDecision,
};

/// All lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A citizen filed a report
    ReportCreated {
        report_id: ReportId,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },

    /// A report moved between statuses
    StatusChanged {
        report_id: ReportId,
        from: ReportStatus,
        to: ReportStatus,
        timestamp: DateTime<Utc>,
    },

    /// A worker became the active assignee
    WorkerAssigned {
        report_id: ReportId,
        worker_id: ActorId,
        previous_worker: Option<ActorId>,
        timestamp: DateTime<Utc>,
    },

    /// A worker submitted a resolution proof
    ProofSubmitted {
        report_id: ReportId,
        proof_id: ProofId,
        worker_id: ActorId,
        timestamp: DateTime<Utc>,
    },

    /// An admin decided on a proof
    ProofVerified {
        report_id: ReportId,
        proof_id: ProofId,
        decision: VerificationDecision,
        timestamp: DateTime<Utc>,
    },

    /// An escalation was opened
    EscalationRaised {
        report_id: ReportId,
        escalation_id: EscalationId,
        severity: Severity,
        automatic: bool,
        timestamp: DateTime<Utc>,
    },

    /// An escalation was resolved
    EscalationResolved {
        report_id: ReportId,
        escalation_id: EscalationId,
        timestamp: DateTime<Utc>,
    },

    /// A message was stored in a channel
    MessagePosted { message: Message },

    /// A notification addressed to one actor
    Notification { notification: Notification },
}

impl LifecycleEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::ReportCreated { timestamp, .. } => *timestamp,
            LifecycleEvent::StatusChanged { timestamp, .. } => *timestamp,
            LifecycleEvent::WorkerAssigned { timestamp, .. } => *timestamp,
            LifecycleEvent::ProofSubmitted { timestamp, .. } => *timestamp,
            LifecycleEvent::ProofVerified { timestamp, .. } => *timestamp,
            LifecycleEvent::EscalationRaised { timestamp, .. } => *timestamp,
            LifecycleEvent::EscalationResolved { timestamp, .. } => *timestamp,
            LifecycleEvent::MessagePosted { message } => message.created_at,
            LifecycleEvent::Notification { notification } => notification.created_at,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::ReportCreated { .. } => "report_created",
            LifecycleEvent::StatusChanged { .. } => "status_changed",
            LifecycleEvent::WorkerAssigned { .. } => "worker_assigned",
            LifecycleEvent::ProofSubmitted { .. } => "proof_submitted",
            LifecycleEvent::ProofVerified { .. } => "proof_verified",
            LifecycleEvent::EscalationRaised { .. } => "escalation_raised",
            LifecycleEvent::EscalationResolved { .. } => "escalation_resolved",
            LifecycleEvent::MessagePosted { .. } => "message_posted",
            LifecycleEvent::Notification { .. } => "notification",
        }
    }

    /// Get the report this event concerns, if any
    pub fn report_id(&self) -> Option<&str> {
        match self {
            LifecycleEvent::ReportCreated { report_id, .. }
            | LifecycleEvent::StatusChanged { report_id, .. }
            | LifecycleEvent::WorkerAssigned { report_id, .. }
            | LifecycleEvent::ProofSubmitted { report_id, .. }
            | LifecycleEvent::ProofVerified { report_id, .. }
            | LifecycleEvent::EscalationRaised { report_id, .. }
            | LifecycleEvent::EscalationResolved { report_id, .. } => Some(report_id),
            LifecycleEvent::MessagePosted { message } => Some(&message.report_id),
            LifecycleEvent::Notification { notification } => notification.report_id.as_deref(),
        }
    }

    /// Channel of a posted message
    pub fn channel(&self) -> Option<Channel> {
        match self {
            LifecycleEvent::MessagePosted { message } => Some(message.channel),
            _ => None,
        }
    }

    /// Recipient of a notification
    pub fn recipient(&self) -> Option<&str> {
        match self {
            LifecycleEvent::Notification { notification } => Some(&notification.recipient),
            _ => None,
        }
    }
}
