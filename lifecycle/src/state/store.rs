//! Store abstraction and the in-memory backend
//!
//! All mutation goes through [`Store::commit`], which applies a
//! [`WriteBatch`] atomically after checking its preconditions. Preconditions
//! are the conditional-update mechanism that makes the engine's guards
//! race-free: a batch planned against a stale snapshot fails instead of
//! overwriting newer state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::types::*;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(Precondition),

    #[error("Append-only {collection} record already exists: {id}")]
    AppendOnly { collection: &'static str, id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a store
pub type SharedStore = Arc<dyn Store>;

/// Condition that must hold when a batch is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Report exists and is in the given status
    ReportStatus {
        report_id: ReportId,
        expected: ReportStatus,
    },
    /// Proof exists and has the given outcome
    ProofOutcome {
        proof_id: ProofId,
        expected: ProofOutcome,
    },
    /// Report has no unresolved escalation
    NoOpenEscalation { report_id: ReportId },
    /// Escalation exists and is unresolved
    EscalationOpen { escalation_id: EscalationId },
    /// Report has no active assignment
    NoActiveAssignment { report_id: ReportId },
    /// The given assignment is the report's active one
    ActiveAssignment {
        report_id: ReportId,
        assignment_id: AssignmentId,
    },
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReportStatus {
                report_id,
                expected,
            } => write!(f, "report {} expected in status {}", report_id, expected),
            Self::ProofOutcome { proof_id, expected } => {
                write!(f, "proof {} expected {:?}", proof_id, expected)
            }
            Self::NoOpenEscalation { report_id } => {
                write!(f, "report {} already has an open escalation", report_id)
            }
            Self::EscalationOpen { escalation_id } => {
                write!(f, "escalation {} is not open", escalation_id)
            }
            Self::NoActiveAssignment { report_id } => {
                write!(f, "report {} already has an active assignment", report_id)
            }
            Self::ActiveAssignment {
                report_id,
                assignment_id,
            } => write!(
                f,
                "assignment {} is no longer active for report {}",
                assignment_id, report_id
            ),
        }
    }
}

/// Lookups needed to evaluate preconditions
pub trait RecordView {
    fn view_report(&self, report_id: &str) -> StoreResult<Option<Report>>;
    fn view_proof(&self, proof_id: &str) -> StoreResult<Option<ResolutionProof>>;
    fn view_escalation(&self, escalation_id: &str) -> StoreResult<Option<Escalation>>;
    fn view_report_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>>;
    fn view_report_assignments(&self, report_id: &str) -> StoreResult<Vec<Assignment>>;
}

impl Precondition {
    /// Evaluate this precondition against the current records
    pub fn holds(&self, view: &impl RecordView) -> StoreResult<bool> {
        Ok(match self {
            Self::ReportStatus {
                report_id,
                expected,
            } => view
                .view_report(report_id)?
                .is_some_and(|r| r.status == *expected),
            Self::ProofOutcome { proof_id, expected } => view
                .view_proof(proof_id)?
                .is_some_and(|p| p.outcome == *expected),
            Self::NoOpenEscalation { report_id } => !view
                .view_report_escalations(report_id)?
                .iter()
                .any(|e| !e.resolved),
            Self::EscalationOpen { escalation_id } => view
                .view_escalation(escalation_id)?
                .is_some_and(|e| !e.resolved),
            Self::NoActiveAssignment { report_id } => !view
                .view_report_assignments(report_id)?
                .iter()
                .any(|a| a.active),
            Self::ActiveAssignment {
                report_id,
                assignment_id,
            } => view
                .view_report_assignments(report_id)?
                .iter()
                .any(|a| a.active && &a.id == assignment_id),
        })
    }
}

/// A record to be written
#[derive(Debug, Clone)]
pub enum Record {
    Report(Report),
    Assignment(Assignment),
    Escalation(Escalation),
    Proof(ResolutionProof),
    /// Append-only
    Message(Message),
    /// Append-only
    Activity(ActivityLogEntry),
    Worker(WorkerProfile),
}

/// Set of writes applied all-or-nothing
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    preconditions: Vec<Precondition>,
    records: Vec<Record>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a condition at commit time
    pub fn expect(&mut self, precondition: Precondition) -> &mut Self {
        self.preconditions.push(precondition);
        self
    }

    /// Upsert a record
    pub fn put(&mut self, record: Record) -> &mut Self {
        self.records.push(record);
        self
    }

    /// Append an audit entry
    pub fn append_log(&mut self, entry: ActivityLogEntry) -> &mut Self {
        self.records.push(Record::Activity(entry));
        self
    }

    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Audit entries carried by this batch
    pub fn log_entries(&self) -> impl Iterator<Item = &ActivityLogEntry> {
        self.records.iter().filter_map(|r| match r {
            Record::Activity(entry) => Some(entry),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Precondition>, Vec<Record>) {
        (self.preconditions, self.records)
    }
}

/// Persistent store for lifecycle records.
///
/// Reads return owned snapshots. Lists come back ordered: reports and
/// assignments by creation time, messages and audit entries by timestamp
/// within their report (and channel).
pub trait Store: Send + Sync {
    /// Apply a batch atomically, failing without effect if any precondition
    /// does not hold
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    fn get_report(&self, report_id: &str) -> StoreResult<Option<Report>>;
    fn list_reports(&self, filter: &ReportFilter) -> StoreResult<Vec<Report>>;

    fn get_assignment(&self, assignment_id: &str) -> StoreResult<Option<Assignment>>;
    fn report_assignments(&self, report_id: &str) -> StoreResult<Vec<Assignment>>;
    fn worker_assignments(&self, worker_id: &str) -> StoreResult<Vec<Assignment>>;

    fn get_escalation(&self, escalation_id: &str) -> StoreResult<Option<Escalation>>;
    fn report_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>>;

    fn get_proof(&self, proof_id: &str) -> StoreResult<Option<ResolutionProof>>;
    fn report_proofs(&self, report_id: &str) -> StoreResult<Vec<ResolutionProof>>;

    fn channel_messages(&self, report_id: &str, channel: Channel) -> StoreResult<Vec<Message>>;
    fn report_activity(&self, report_id: &str) -> StoreResult<Vec<ActivityLogEntry>>;

    fn get_worker(&self, worker_id: &str) -> StoreResult<Option<WorkerProfile>>;
    fn list_workers(&self) -> StoreResult<Vec<WorkerProfile>>;

    /// The report's active assignment, if any
    fn active_assignment(&self, report_id: &str) -> StoreResult<Option<Assignment>> {
        Ok(self
            .report_assignments(report_id)?
            .into_iter()
            .find(|a| a.active))
    }

    /// Unresolved escalations of a report
    fn open_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>> {
        Ok(self
            .report_escalations(report_id)?
            .into_iter()
            .filter(|e| !e.resolved)
            .collect())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct Tables {
    reports: HashMap<ReportId, Report>,
    assignments: HashMap<AssignmentId, Assignment>,
    escalations: HashMap<EscalationId, Escalation>,
    proofs: HashMap<ProofId, ResolutionProof>,
    messages: HashMap<(ReportId, Channel), Vec<Message>>,
    message_ids: HashSet<MessageId>,
    activity: HashMap<ReportId, Vec<ActivityLogEntry>>,
    entry_ids: HashSet<EntryId>,
    workers: HashMap<ActorId, WorkerProfile>,
}

impl Tables {
    fn check_append_only(&self, record: &Record) -> StoreResult<()> {
        match record {
            Record::Message(m) if self.message_ids.contains(&m.id) => {
                Err(StoreError::AppendOnly {
                    collection: "message",
                    id: m.id.clone(),
                })
            }
            Record::Activity(e) if self.entry_ids.contains(&e.id) => {
                Err(StoreError::AppendOnly {
                    collection: "activity",
                    id: e.id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, record: Record) {
        match record {
            Record::Report(r) => {
                self.reports.insert(r.id.clone(), r);
            }
            Record::Assignment(a) => {
                self.assignments.insert(a.id.clone(), a);
            }
            Record::Escalation(e) => {
                self.escalations.insert(e.id.clone(), e);
            }
            Record::Proof(p) => {
                self.proofs.insert(p.id.clone(), p);
            }
            Record::Message(m) => {
                self.message_ids.insert(m.id.clone());
                self.messages
                    .entry((m.report_id.clone(), m.channel))
                    .or_default()
                    .push(m);
            }
            Record::Activity(e) => {
                self.entry_ids.insert(e.id.clone());
                self.activity.entry(e.report_id.clone()).or_default().push(e);
            }
            Record::Worker(w) => {
                self.workers.insert(w.id.clone(), w);
            }
        }
    }

    fn assignments_where(&self, pred: impl Fn(&Assignment) -> bool) -> Vec<Assignment> {
        let mut found: Vec<Assignment> = self
            .assignments
            .values()
            .filter(|a| pred(a))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        found
    }
}

impl RecordView for Tables {
    fn view_report(&self, report_id: &str) -> StoreResult<Option<Report>> {
        Ok(self.reports.get(report_id).cloned())
    }

    fn view_proof(&self, proof_id: &str) -> StoreResult<Option<ResolutionProof>> {
        Ok(self.proofs.get(proof_id).cloned())
    }

    fn view_escalation(&self, escalation_id: &str) -> StoreResult<Option<Escalation>> {
        Ok(self.escalations.get(escalation_id).cloned())
    }

    fn view_report_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>> {
        Ok(self
            .escalations
            .values()
            .filter(|e| e.report_id == report_id)
            .cloned()
            .collect())
    }

    fn view_report_assignments(&self, report_id: &str) -> StoreResult<Vec<Assignment>> {
        Ok(self.assignments_where(|a| a.report_id == report_id))
    }
}

/// Process-local store, the default backend
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Store for MemoryStore {
    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let (preconditions, records) = batch.into_parts();
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;

        for precondition in preconditions {
            if !precondition.holds(&*tables)? {
                return Err(StoreError::PreconditionFailed(precondition));
            }
        }
        for record in &records {
            tables.check_append_only(record)?;
        }
        for record in records {
            tables.apply(record);
        }
        Ok(())
    }

    fn get_report(&self, report_id: &str) -> StoreResult<Option<Report>> {
        self.read()?.view_report(report_id)
    }

    fn list_reports(&self, filter: &ReportFilter) -> StoreResult<Vec<Report>> {
        let tables = self.read()?;
        let mut reports: Vec<Report> = tables
            .reports
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(reports)
    }

    fn get_assignment(&self, assignment_id: &str) -> StoreResult<Option<Assignment>> {
        Ok(self.read()?.assignments.get(assignment_id).cloned())
    }

    fn report_assignments(&self, report_id: &str) -> StoreResult<Vec<Assignment>> {
        self.read()?.view_report_assignments(report_id)
    }

    fn worker_assignments(&self, worker_id: &str) -> StoreResult<Vec<Assignment>> {
        Ok(self.read()?.assignments_where(|a| a.worker_id == worker_id))
    }

    fn get_escalation(&self, escalation_id: &str) -> StoreResult<Option<Escalation>> {
        self.read()?.view_escalation(escalation_id)
    }

    fn report_escalations(&self, report_id: &str) -> StoreResult<Vec<Escalation>> {
        let mut escalations = self.read()?.view_report_escalations(report_id)?;
        escalations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(escalations)
    }

    fn get_proof(&self, proof_id: &str) -> StoreResult<Option<ResolutionProof>> {
        self.read()?.view_proof(proof_id)
    }

    fn report_proofs(&self, report_id: &str) -> StoreResult<Vec<ResolutionProof>> {
        let mut proofs: Vec<ResolutionProof> = self
            .read()?
            .proofs
            .values()
            .filter(|p| p.report_id == report_id)
            .cloned()
            .collect();
        proofs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(proofs)
    }

    fn channel_messages(&self, report_id: &str, channel: Channel) -> StoreResult<Vec<Message>> {
        let tables = self.read()?;
        let mut messages = tables
            .messages
            .get(&(report_id.to_string(), channel))
            .cloned()
            .unwrap_or_default();
        // Stable: equal timestamps keep commit order
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    fn report_activity(&self, report_id: &str) -> StoreResult<Vec<ActivityLogEntry>> {
        let tables = self.read()?;
        let mut entries = tables.activity.get(report_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    fn get_worker(&self, worker_id: &str) -> StoreResult<Option<WorkerProfile>> {
        Ok(self.read()?.workers.get(worker_id).cloned())
    }

    fn list_workers(&self) -> StoreResult<Vec<WorkerProfile>> {
        let mut workers: Vec<WorkerProfile> = self.read()?.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_report() -> Report {
        Report::new(
            "citizen-1",
            NewReport {
                title: "Broken streetlight".to_string(),
                description: "Flickering all night".to_string(),
                category: "lighting".to_string(),
                priority: Priority::Medium,
                risk_score: 40.0,
                location: Location::default(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_report_crud() {
        let store = MemoryStore::new();
        let report = sample_report();

        let mut batch = WriteBatch::new();
        batch.put(Record::Report(report.clone()));
        store.commit(batch).unwrap();

        let retrieved = store.get_report(&report.id).unwrap().unwrap();
        assert_eq!(retrieved, report);
        assert_eq!(store.list_reports(&ReportFilter::open()).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_precondition_applies_nothing() {
        let store = MemoryStore::new();
        let mut report = sample_report();

        let mut batch = WriteBatch::new();
        batch.put(Record::Report(report.clone()));
        store.commit(batch).unwrap();

        report.status = ReportStatus::Assigned;
        let mut batch = WriteBatch::new();
        batch
            .expect(Precondition::ReportStatus {
                report_id: report.id.clone(),
                expected: ReportStatus::Reopened,
            })
            .put(Record::Report(report.clone()))
            .append_log(ActivityLogEntry::new(
                report.id.clone(),
                None,
                ActionType::StatusChanged,
                serde_json::json!({}),
                Utc::now(),
            ));

        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));

        let stored = store.get_report(&report.id).unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Reported);
        assert!(store.report_activity(&report.id).unwrap().is_empty());
    }

    #[test]
    fn test_activity_is_append_only() {
        let store = MemoryStore::new();
        let entry = ActivityLogEntry::new(
            "r1",
            None,
            ActionType::ReportCreated,
            serde_json::json!({}),
            Utc::now(),
        );

        let mut batch = WriteBatch::new();
        batch.append_log(entry.clone());
        store.commit(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.append_log(entry);
        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, StoreError::AppendOnly { .. }));
        assert_eq!(store.report_activity("r1").unwrap().len(), 1);
    }

    #[test]
    fn test_active_assignment_precondition() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let assignment = Assignment::new("r1", "w1", "admin-1", None, now);

        let mut batch = WriteBatch::new();
        batch
            .expect(Precondition::NoActiveAssignment {
                report_id: "r1".to_string(),
            })
            .put(Record::Assignment(assignment.clone()));
        store.commit(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .expect(Precondition::NoActiveAssignment {
                report_id: "r1".to_string(),
            })
            .put(Record::Assignment(Assignment::new(
                "r1", "w2", "admin-1", None, now,
            )));
        assert!(store.commit(batch).is_err());

        let active = store.active_assignment("r1").unwrap().unwrap();
        assert_eq!(active.id, assignment.id);
        assert_eq!(store.worker_assignments("w2").unwrap().len(), 0);
    }
}
