//! Lifecycle error types
//!
//! Every rejected operation surfaces a distinguishable kind so a calling
//! transport can render a specific message. [`LifecycleError::code`] gives a
//! stable machine-readable code for each kind.

use thiserror::Error;

use crate::state::{Channel, ReportStatus, Role, StoreError};

/// Result type alias for engine operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors that can occur during lifecycle operations
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The requested status change is not an edge of the state machine
    #[error("Invalid transition for report {report_id}: {from} -> {to}")]
    InvalidTransition {
        report_id: String,
        from: ReportStatus,
        to: ReportStatus,
    },

    /// The report is closed and rejects status-changing operations
    #[error("Report {report_id} is closed")]
    ReportLocked { report_id: String },

    /// The report already has an active assignment
    #[error("Report {report_id} is already assigned to {worker_id}")]
    AlreadyAssigned {
        report_id: String,
        worker_id: String,
    },

    /// The actor is not the report's active assignee
    #[error("{actor_id} is not the assigned worker for report {report_id}")]
    NotAssignedWorker {
        report_id: String,
        actor_id: String,
    },

    /// The report already has an unresolved escalation
    #[error("Report {report_id} already has an open escalation {escalation_id}")]
    DuplicateEscalation {
        report_id: String,
        escalation_id: String,
    },

    /// The proof has already been decided
    #[error("Proof {proof_id} was already verified")]
    AlreadyVerified { proof_id: String },

    /// The actor may not use this channel
    #[error("{role} {actor_id} may not access the {channel} channel of report {report_id}")]
    ChannelForbidden {
        report_id: String,
        actor_id: String,
        role: Role,
        channel: Channel,
    },

    /// The actor's role lacks the capability for this operation
    #[error("{role} {actor_id} is not allowed to {action}")]
    Forbidden {
        actor_id: String,
        role: Role,
        action: &'static str,
    },

    /// A referenced record does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller-supplied input failed validation
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// The escalation was already resolved
    #[error("Escalation {escalation_id} is already resolved")]
    EscalationResolved { escalation_id: String },

    /// Persistence failed; the operation had no effect
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ReportLocked { .. } => "REPORT_LOCKED",
            Self::AlreadyAssigned { .. } => "ALREADY_ASSIGNED",
            Self::NotAssignedWorker { .. } => "NOT_ASSIGNED_WORKER",
            Self::DuplicateEscalation { .. } => "DUPLICATE_ESCALATION",
            Self::AlreadyVerified { .. } => "ALREADY_VERIFIED",
            Self::ChannelForbidden { .. } => "CHANNEL_FORBIDDEN",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::EscalationResolved { .. } => "ESCALATION_RESOLVED",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Only store failures qualify; the engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_)) | Self::Store(StoreError::LockPoisoned)
        )
    }
}
