//! Core record types for the report lifecycle
//!
//! These types are persisted by the [`Store`](super::Store) and represent the
//! authoritative state of every civic issue report, its assignments,
//! escalations, resolution proofs, messages and audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for reports
pub type ReportId = String;

/// Stable identity of an actor (citizen, worker or admin)
pub type ActorId = String;

/// Unique identifier for assignments
pub type AssignmentId = String;

/// Unique identifier for escalations
pub type EscalationId = String;

/// Unique identifier for resolution proofs
pub type ProofId = String;

/// Unique identifier for messages
pub type MessageId = String;

/// Unique identifier for audit entries
pub type EntryId = String;

/// Generate a fresh record identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Actors
// ============================================================================

/// Role an actor plays in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Member of the public reporting issues
    Citizen,
    /// Field worker resolving issues
    Worker,
    /// Municipal administrator
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Citizen => write!(f, "citizen"),
            Role::Worker => write!(f, "worker"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// The identity and role performing an operation.
///
/// Passed explicitly into every engine call so capability checks happen
/// inside the engine rather than at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn citizen(id: impl Into<ActorId>) -> Self {
        Self::new(id, Role::Citizen)
    }

    pub fn worker(id: impl Into<ActorId>) -> Self {
        Self::new(id, Role::Worker)
    }

    pub fn admin(id: impl Into<ActorId>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Report priority, which selects the SLA budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// All priorities, lowest first
    pub fn all() -> &'static [Priority] {
        &[
            Priority::Low,
            Priority::Medium,
            Priority::High,
            Priority::Urgent,
        ]
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Lifecycle status of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Filed by a citizen, nobody assigned yet
    Reported,
    /// A worker holds the active assignment
    Assigned,
    /// The assigned worker has started
    InProgress,
    /// A resolution proof is waiting for admin review
    AwaitingVerification,
    /// Resolved and verified (terminal)
    Closed,
    /// Sent back after a rejected proof or reassignment
    Reopened,
}

impl ReportStatus {
    /// Whether no further status change is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Reported => "reported",
            ReportStatus::Assigned => "assigned",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::AwaitingVerification => "awaiting_verification",
            ReportStatus::Closed => "closed",
            ReportStatus::Reopened => "reopened",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the issue is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Citizen-supplied input for a new report.
///
/// `risk_score` and `category` come from the external image scorer and are
/// treated as opaque apart from range clamping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub risk_score: f64,
    pub location: Location,
}

/// Clamp an externally supplied risk score into 0..=100
pub fn clamp_risk_score(score: f64) -> u8 {
    if score.is_nan() {
        return 0;
    }
    score.round().clamp(0.0, 100.0) as u8
}

/// A civic issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub status: ReportStatus,
    pub risk_score: u8,
    pub created_at: DateTime<Utc>,
    /// Set iff `status == Closed`
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether an unresolved escalation is attached
    pub escalated: bool,
    pub reporter_id: ActorId,
    pub location: Location,
    /// Incremented each time the report is reopened
    pub proof_cycle: u32,
    pub archived: bool,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// Build a freshly reported issue
    pub fn new(reporter_id: impl Into<ActorId>, input: NewReport, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            title: input.title.trim().to_string(),
            description: input.description,
            category: input.category,
            priority: input.priority,
            status: ReportStatus::Reported,
            risk_score: clamp_risk_score(input.risk_score),
            created_at: now,
            resolved_at: None,
            escalated: false,
            reporter_id: reporter_id.into(),
            location: input.location,
            proof_cycle: 0,
            archived: false,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == ReportStatus::Closed
    }

    /// `resolved_at` is present exactly when the report is closed
    pub fn resolution_consistent(&self) -> bool {
        self.resolved_at.is_some() == self.is_closed()
    }
}

/// Filter for report listings
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub status: Option<Vec<ReportStatus>>,
    pub priority: Option<Priority>,
    pub reporter_id: Option<ActorId>,
    pub escalated: Option<bool>,
    pub include_archived: bool,
}

impl ReportFilter {
    /// Every report that is not closed
    pub fn open() -> Self {
        Self {
            status: Some(vec![
                ReportStatus::Reported,
                ReportStatus::Assigned,
                ReportStatus::InProgress,
                ReportStatus::AwaitingVerification,
                ReportStatus::Reopened,
            ]),
            ..Default::default()
        }
    }

    pub fn matches(&self, report: &Report) -> bool {
        if !self.include_archived && report.archived {
            return false;
        }
        if let Some(ref statuses) = self.status {
            if !statuses.contains(&report.status) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if report.priority != priority {
                return false;
            }
        }
        if let Some(ref reporter) = self.reporter_id {
            if &report.reporter_id != reporter {
                return false;
            }
        }
        if let Some(escalated) = self.escalated {
            if report.escalated != escalated {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Assignments and workers
// ============================================================================

/// Binding of one worker to one report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub report_id: ReportId,
    pub worker_id: ActorId,
    pub assigned_by: ActorId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<String>,
}

impl Assignment {
    pub fn new(
        report_id: impl Into<ReportId>,
        worker_id: impl Into<ActorId>,
        assigned_by: impl Into<ActorId>,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            report_id: report_id.into(),
            worker_id: worker_id.into(),
            assigned_by: assigned_by.into(),
            active: true,
            created_at: now,
            deadline,
            deactivated_at: None,
            deactivation_reason: None,
        }
    }

    /// Mark this assignment inactive
    pub fn deactivate(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.active = false;
        self.deactivated_at = Some(now);
        self.deactivation_reason = Some(reason.into());
    }
}

/// Worker availability for display and cooldown tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerAvailability {
    Available,
    Busy,
}

/// A registered field worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: ActorId,
    pub display_name: String,
    pub availability: WorkerAvailability,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl WorkerProfile {
    pub fn new(id: impl Into<ActorId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            availability: WorkerAvailability::Available,
            last_assigned_at: None,
        }
    }
}

// ============================================================================
// Escalations
// ============================================================================

/// How serious an escalation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Default severity for an SLA breach at the given priority
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Low => Severity::Low,
            Priority::Medium => Severity::Medium,
            Priority::High => Severity::High,
            Priority::Urgent => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Who raised an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSource {
    /// Detected by the SLA sweep
    Automatic,
    /// Flagged by an actor
    Manual,
}

/// A flagged exceptional condition on a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub report_id: ReportId,
    pub reason: String,
    pub severity: Severity,
    pub source: EscalationSource,
    pub raised_by: Option<ActorId>,
    pub resolved: bool,
    pub resolved_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn is_auto(&self) -> bool {
        self.source == EscalationSource::Automatic
    }
}

// ============================================================================
// Resolution proofs
// ============================================================================

/// Verification state of a proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofOutcome {
    Pending,
    Approved,
    Rejected,
}

/// Admin decision on a pending proof
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationDecision {
    /// Work accepted, report closes
    Approved,
    /// Same worker must redo the work
    Rejected,
    /// Worker is removed, report waits for a new assignment
    Reassign,
}

impl VerificationDecision {
    /// Outcome recorded on the proof for this decision
    pub fn outcome(&self) -> ProofOutcome {
        match self {
            VerificationDecision::Approved => ProofOutcome::Approved,
            VerificationDecision::Rejected | VerificationDecision::Reassign => {
                ProofOutcome::Rejected
            }
        }
    }
}

impl std::fmt::Display for VerificationDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationDecision::Approved => write!(f, "approved"),
            VerificationDecision::Rejected => write!(f, "rejected"),
            VerificationDecision::Reassign => write!(f, "reassign"),
        }
    }
}

/// Worker-submitted evidence of completed work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionProof {
    pub id: ProofId,
    pub report_id: ReportId,
    pub worker_id: ActorId,
    /// References into external evidence storage
    pub evidence: Vec<String>,
    pub notes: Option<String>,
    /// Proof cycle of the report at submission time
    pub cycle: u32,
    pub outcome: ProofOutcome,
    pub decision: Option<VerificationDecision>,
    pub verified_by: Option<ActorId>,
    pub verified_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    /// 1..=5, only on approval
    pub rating: Option<u8>,
    pub submitted_at: DateTime<Utc>,
}

// ============================================================================
// Messages
// ============================================================================

/// Visibility scope of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Reporter and admins write; any citizen and admins read
    Public,
    /// Private between the reporter and admins
    AdminCitizen,
    /// Private between assigned workers and admins
    Worker,
}

impl Channel {
    pub fn all() -> &'static [Channel] {
        &[Channel::Public, Channel::AdminCitizen, Channel::Worker]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Public => "public",
            Channel::AdminCitizen => "admin_citizen",
            Channel::Worker => "worker",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A communication unit scoped to exactly one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub report_id: ReportId,
    pub sender_id: ActorId,
    pub sender_role: Role,
    pub channel: Channel,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Activity log
// ============================================================================

/// Kind of audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ReportCreated,
    StatusChanged,
    WorkerAssigned,
    WorkerReassigned,
    ProofSubmitted,
    Verification,
    Escalated,
    EscalationResolved,
    EscalationReassigned,
    ReportArchived,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ReportCreated => "report_created",
            ActionType::StatusChanged => "status_changed",
            ActionType::WorkerAssigned => "worker_assigned",
            ActionType::WorkerReassigned => "worker_reassigned",
            ActionType::ProofSubmitted => "proof_submitted",
            ActionType::Verification => "verification",
            ActionType::Escalated => "escalated",
            ActionType::EscalationResolved => "escalation_resolved",
            ActionType::EscalationReassigned => "escalation_reassigned",
            ActionType::ReportArchived => "report_archived",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: EntryId,
    pub report_id: ReportId,
    /// `None` for system-generated entries
    pub actor_id: Option<ActorId>,
    pub action: ActionType,
    pub details: serde_json::Value,
    /// Shared by entries produced by the same causal event
    pub causation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn new(
        report_id: impl Into<ReportId>,
        actor_id: Option<ActorId>,
        action: ActionType,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            report_id: report_id.into(),
            actor_id,
            action,
            details,
            causation_id: None,
            created_at: now,
        }
    }

    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}
