//! Integration tests for the report lifecycle
//!
//! Drives the engine through full report histories and checks the
//! invariants that must hold after every operation: `resolved_at` is set
//! exactly when a report is closed, at most one assignment is active, at
//! most one escalation is open, and a rejected operation writes nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use chrono::{Duration, TimeZone, Utc};

use civic_lifecycle::state::{
    ActivityLogEntry, Assignment, Escalation, ReportFilter, ResolutionProof, SharedStore,
    StoreError, StoreResult, WorkerProfile, WriteBatch,
};
use civic_lifecycle::{
    ActionType, Actor, Channel, Engine, EngineConfig, LifecycleError, Location, ManualClock,
    MemoryStore, Message, NewReport, Notification, NotificationKind, Notifier, NotifyError,
    Priority, ProofOutcome, Report, ReportStatus, Severity, Store, Verdict,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Captures notifications instead of delivering them
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn kinds_for(&self, recipient: &str) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.recipient == recipient)
            .map(|n| n.kind)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Always fails to deliver
struct DownNotifier;

impl Notifier for DownNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery {
            recipient: notification.recipient.clone(),
            reason: "gateway timeout".to_string(),
        })
    }
}

/// Store whose commits fail whenever they carry an audit entry, once armed
struct AuditFailingStore {
    inner: MemoryStore,
    armed: AtomicBool,
}

impl AuditFailingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl Store for AuditFailingStore {
    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if self.armed.load(Ordering::SeqCst) && batch.log_entries().next().is_some() {
            return Err(StoreError::Unavailable("activity log append failed".to_string()));
        }
        self.inner.commit(batch)
    }
    fn get_report(&self, id: &str) -> StoreResult<Option<Report>> {
        self.inner.get_report(id)
    }
    fn list_reports(&self, filter: &ReportFilter) -> StoreResult<Vec<Report>> {
        self.inner.list_reports(filter)
    }
    fn get_assignment(&self, id: &str) -> StoreResult<Option<Assignment>> {
        self.inner.get_assignment(id)
    }
    fn report_assignments(&self, id: &str) -> StoreResult<Vec<Assignment>> {
        self.inner.report_assignments(id)
    }
    fn worker_assignments(&self, id: &str) -> StoreResult<Vec<Assignment>> {
        self.inner.worker_assignments(id)
    }
    fn get_escalation(&self, id: &str) -> StoreResult<Option<Escalation>> {
        self.inner.get_escalation(id)
    }
    fn report_escalations(&self, id: &str) -> StoreResult<Vec<Escalation>> {
        self.inner.report_escalations(id)
    }
    fn get_proof(&self, id: &str) -> StoreResult<Option<ResolutionProof>> {
        self.inner.get_proof(id)
    }
    fn report_proofs(&self, id: &str) -> StoreResult<Vec<ResolutionProof>> {
        self.inner.report_proofs(id)
    }
    fn channel_messages(&self, id: &str, channel: Channel) -> StoreResult<Vec<Message>> {
        self.inner.channel_messages(id, channel)
    }
    fn report_activity(&self, id: &str) -> StoreResult<Vec<ActivityLogEntry>> {
        self.inner.report_activity(id)
    }
    fn get_worker(&self, id: &str) -> StoreResult<Option<WorkerProfile>> {
        self.inner.get_worker(id)
    }
    fn list_workers(&self) -> StoreResult<Vec<WorkerProfile>> {
        self.inner.list_workers()
    }
}

fn admin() -> Actor {
    Actor::admin("admin-1")
}

fn reporter() -> Actor {
    Actor::citizen("citizen-1")
}

fn new_report(priority: Priority) -> NewReport {
    NewReport {
        title: "Pothole on Harbour Rd".to_string(),
        description: "Two lanes affected".to_string(),
        category: "roads".to_string(),
        priority,
        risk_score: 64.0,
        location: Location {
            address: "Harbour Rd / 3rd Ave".to_string(),
            latitude: Some(-33.86),
            longitude: Some(151.21),
        },
    }
}

fn with_workers(engine: Engine) -> Engine {
    for w in ["w1", "w2", "w3"] {
        engine.register_worker(&admin(), w, w).unwrap();
    }
    engine
}

/// Report in `in_progress` with `w1` working on it
fn in_progress(engine: &Engine) -> Report {
    let report = engine
        .create_report(&reporter(), new_report(Priority::Medium))
        .unwrap();
    engine.assign(&report.id, "w1", &admin(), None).unwrap();
    engine
        .transition(&report.id, ReportStatus::InProgress, &Actor::worker("w1"))
        .unwrap()
}

/// Report in `awaiting_verification` and its pending proof
fn awaiting_verification(engine: &Engine) -> (Report, ResolutionProof) {
    let report = in_progress(engine);
    let proof = engine
        .submit_proof(
            &report.id,
            &Actor::worker("w1"),
            vec!["evidence/harbour-after.jpg".to_string()],
            Some("Patched and rolled".to_string()),
        )
        .unwrap();
    (engine.get_report(&report.id).unwrap(), proof)
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    report: Report,
    assignments: Vec<Assignment>,
    escalations: Vec<Escalation>,
    proofs: Vec<ResolutionProof>,
    activity: Vec<ActivityLogEntry>,
}

fn snapshot(engine: &Engine, report_id: &str) -> Snapshot {
    let store = engine.store();
    Snapshot {
        report: store.get_report(report_id).unwrap().unwrap(),
        assignments: store.report_assignments(report_id).unwrap(),
        escalations: store.report_escalations(report_id).unwrap(),
        proofs: store.report_proofs(report_id).unwrap(),
        activity: store.report_activity(report_id).unwrap(),
    }
}

fn assert_invariants(engine: &Engine, report_id: &str) {
    let snap = snapshot(engine, report_id);
    assert_eq!(
        snap.report.resolved_at.is_some(),
        snap.report.status == ReportStatus::Closed,
        "resolved_at must be set exactly when closed: {:?}",
        snap.report
    );
    assert!(snap.assignments.iter().filter(|a| a.active).count() <= 1);
    let open = snap.escalations.iter().filter(|e| !e.resolved).count();
    assert!(open <= 1);
    assert_eq!(snap.report.escalated, open > 0);
    let mut sorted = snap.activity.clone();
    sorted.sort_by_key(|e| e.created_at);
    assert_eq!(sorted, snap.activity, "timeline must be ordered");
}

// ============================================================================
// Scenarios
// ============================================================================

/// Urgent report untouched for 25h is auto-escalated exactly once
#[test]
fn test_scenario_a_urgent_sla_breach() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 9, 2, 7, 30, 0).unwrap(),
    ));
    let engine = Engine::in_memory().with_clock(clock.clone());
    let report = engine
        .create_report(&reporter(), new_report(Priority::Urgent))
        .unwrap();

    clock.advance(Duration::hours(25));
    let sweep = engine.sweep_sla_breaches().unwrap();

    assert_eq!(sweep.escalated.len(), 1);
    assert!(sweep.escalated[0].is_auto());
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Reported);

    let escalated = engine.timeline_of(&report.id, ActionType::Escalated).unwrap();
    assert_eq!(escalated.len(), 1);
    assert_eq!(escalated[0].details["is_auto_escalated"], true);

    assert!(engine.sweep_sla_breaches().unwrap().escalated.is_empty());
    assert_eq!(engine.store().report_escalations(&report.id).unwrap().len(), 1);
    assert_invariants(&engine, &report.id);
}

/// Reassignment swaps the active assignment and lands in `assigned`
#[test]
fn test_scenario_b_reassign() {
    let engine = with_workers(Engine::in_memory());
    let report = engine
        .create_report(&reporter(), new_report(Priority::High))
        .unwrap();
    let first = engine.assign(&report.id, "w1", &admin(), None).unwrap();

    let second = engine
        .reassign(&report.id, "w2", &admin(), "w1 needs a cherry picker")
        .unwrap();

    let assignments = engine.store().report_assignments(&report.id).unwrap();
    let old = assignments.iter().find(|a| a.id == first.id).unwrap();
    let new = assignments.iter().find(|a| a.id == second.id).unwrap();
    assert!(!old.active);
    assert!(new.active);
    assert_eq!(new.worker_id, "w2");
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Assigned);
    assert_invariants(&engine, &report.id);
}

/// Rejection reopens the report and keeps the worker
#[test]
fn test_scenario_c_reject() {
    let engine = with_workers(Engine::in_memory());
    let (report, proof) = awaiting_verification(&engine);
    let active_before = engine.store().active_assignment(&report.id).unwrap().unwrap();

    let decided = engine
        .verify(&report.id, &proof.id, &admin(), Verdict::reject("redo edge"))
        .unwrap();

    assert_eq!(decided.outcome, ProofOutcome::Rejected);
    assert_eq!(decided.review_comment.as_deref(), Some("redo edge"));
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Reopened);
    let active_after = engine.store().active_assignment(&report.id).unwrap().unwrap();
    assert_eq!(active_after, active_before);
    assert_invariants(&engine, &report.id);
}

/// Verify-reassign reopens with no assignee until an explicit assign
#[test]
fn test_scenario_d_verify_reassign() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = with_workers(Engine::in_memory().with_notifier(notifier.clone()));
    let (report, proof) = awaiting_verification(&engine);

    let decided = engine
        .verify(&report.id, &proof.id, &admin(), Verdict::reassign("needs specialist"))
        .unwrap();

    assert_eq!(decided.outcome, ProofOutcome::Rejected);
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Reopened);
    assert!(engine.store().active_assignment(&report.id).unwrap().is_none());
    assert_eq!(engine.store().report_assignments(&report.id).unwrap().len(), 1);
    assert!(notifier
        .kinds_for("w1")
        .contains(&NotificationKind::WorkerRemoved));
    assert_invariants(&engine, &report.id);

    // Explicit assignment picks the report back up
    engine.assign(&report.id, "w3", &admin(), None).unwrap();
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Assigned);
    assert_invariants(&engine, &report.id);
}

/// A second decision fails and writes nothing
#[test]
fn test_scenario_e_double_verify() {
    let engine = with_workers(Engine::in_memory());
    let (report, proof) = awaiting_verification(&engine);
    engine
        .verify(&report.id, &proof.id, &admin(), Verdict::approve(4))
        .unwrap();
    let before = snapshot(&engine, &report.id);

    let err = engine
        .verify(&report.id, &proof.id, &admin(), Verdict::reject("actually no"))
        .unwrap_err();

    assert!(matches!(err, LifecycleError::AlreadyVerified { .. }));
    assert_eq!(snapshot(&engine, &report.id), before);
}

// ============================================================================
// Round trip and properties
// ============================================================================

#[test]
fn test_submit_approve_round_trip() {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = with_workers(Engine::in_memory().with_notifier(notifier.clone()));
    let (report, proof) = awaiting_verification(&engine);
    assert_eq!(report.status, ReportStatus::AwaitingVerification);

    engine
        .verify(&report.id, &proof.id, &admin(), Verdict::approve(5).with_comment("Tidy job"))
        .unwrap();

    let closed = engine.get_report(&report.id).unwrap();
    assert_eq!(closed.status, ReportStatus::Closed);
    assert!(closed.resolved_at.is_some());

    let stored = engine.store().get_proof(&proof.id).unwrap().unwrap();
    assert_eq!(stored.outcome, ProofOutcome::Approved);
    assert_eq!(stored.verified_by.as_deref(), Some("admin-1"));
    assert_eq!(stored.rating, Some(5));

    let actions: Vec<ActionType> = engine
        .timeline(&report.id)
        .unwrap()
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            ActionType::ReportCreated,
            ActionType::WorkerAssigned,
            ActionType::StatusChanged,
            ActionType::ProofSubmitted,
            ActionType::Verification,
        ]
    );

    assert!(notifier.kinds_for("citizen-1").contains(&NotificationKind::ReportResolved));
    assert!(notifier.kinds_for("w1").contains(&NotificationKind::ProofApproved));
    assert_invariants(&engine, &report.id);

    // Closed reports accept nothing that changes status
    for target in [ReportStatus::Assigned, ReportStatus::InProgress, ReportStatus::Reopened] {
        let err = engine.transition(&report.id, target, &admin()).unwrap_err();
        assert!(matches!(err, LifecycleError::ReportLocked { .. }));
    }
    let err = engine.reassign(&report.id, "w2", &admin(), "late").unwrap_err();
    assert!(matches!(err, LifecycleError::ReportLocked { .. }));
}

#[test]
fn test_failed_operations_leave_snapshot_unchanged() {
    let engine = with_workers(Engine::in_memory());
    let report = in_progress(&engine);
    let before = snapshot(&engine, &report.id);

    let attempts: Vec<LifecycleError> = vec![
        engine
            .transition(&report.id, ReportStatus::Closed, &admin())
            .unwrap_err(),
        engine
            .transition(&report.id, ReportStatus::AwaitingVerification, &Actor::worker("w1"))
            .unwrap_err(),
        engine
            .transition(&report.id, ReportStatus::Reopened, &admin())
            .unwrap_err(),
        engine.assign(&report.id, "w2", &admin(), None).unwrap_err(),
        engine
            .submit_proof(&report.id, &Actor::worker("w2"), vec!["x".into()], None)
            .unwrap_err(),
        engine
            .submit_proof(&report.id, &Actor::worker("w1"), vec![], None)
            .unwrap_err(),
    ];

    let codes: Vec<&str> = attempts.iter().map(|e| e.code()).collect();
    assert_eq!(
        codes,
        vec![
            "INVALID_TRANSITION",
            "INVALID_TRANSITION",
            "INVALID_TRANSITION",
            "ALREADY_ASSIGNED",
            "NOT_ASSIGNED_WORKER",
            "INVALID_INPUT",
        ]
    );
    assert_eq!(snapshot(&engine, &report.id), before);
}

#[test]
fn test_start_work_only_by_assignee() {
    let engine = with_workers(Engine::in_memory());
    let report = engine
        .create_report(&reporter(), new_report(Priority::Low))
        .unwrap();
    engine.assign(&report.id, "w1", &admin(), None).unwrap();

    let err = engine
        .transition(&report.id, ReportStatus::InProgress, &Actor::worker("w2"))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NotAssignedWorker { .. }));

    engine
        .transition(&report.id, ReportStatus::InProgress, &Actor::worker("w1"))
        .unwrap();
    assert_invariants(&engine, &report.id);
}

#[test]
fn test_direct_assign_transition_needs_assignment() {
    let engine = with_workers(Engine::in_memory());
    let report = engine
        .create_report(&reporter(), new_report(Priority::Low))
        .unwrap();

    let err = engine
        .transition(&report.id, ReportStatus::Assigned, &admin())
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InvalidTransition {
            from: ReportStatus::Reported,
            to: ReportStatus::Assigned,
            ..
        }
    ));

    // After a rejection the worker still holds the assignment, so the
    // direct reopened -> assigned edge is open
    let (report, proof) = awaiting_verification(&engine);
    engine
        .verify(&report.id, &proof.id, &admin(), Verdict::reject("gap at kerb"))
        .unwrap();
    let reassigned = engine
        .transition(&report.id, ReportStatus::Assigned, &admin())
        .unwrap();
    assert_eq!(reassigned.status, ReportStatus::Assigned);
    assert_eq!(reassigned.proof_cycle, 1);
}

#[test]
fn test_escalation_lifecycle_keeps_invariants() {
    let engine = with_workers(Engine::in_memory());
    let report = in_progress(&engine);

    let escalation = engine
        .escalate(&report.id, "Worker has not been seen", Severity::Medium, &reporter())
        .unwrap();
    assert_invariants(&engine, &report.id);

    let err = engine
        .escalate(&report.id, "Still nothing", Severity::High, &Actor::worker("w1"))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::DuplicateEscalation { .. }));

    engine
        .reassign_from_escalation(&escalation.id, "w2", &admin())
        .unwrap();
    assert_invariants(&engine, &report.id);

    // The displaced worker keeps escalation rights through their history
    engine
        .escalate(&report.id, "Handover notes missing", Severity::Low, &Actor::worker("w1"))
        .unwrap();
    assert_invariants(&engine, &report.id);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_audit_failure_aborts_status_change() {
    let store = Arc::new(AuditFailingStore::new());
    let shared: SharedStore = store.clone();
    let engine = with_workers(Engine::new(shared, EngineConfig::default()));
    let report = engine
        .create_report(&reporter(), new_report(Priority::High))
        .unwrap();
    engine.assign(&report.id, "w1", &admin(), None).unwrap();
    let before = snapshot(&engine, &report.id);

    store.arm();
    let err = engine
        .transition(&report.id, ReportStatus::InProgress, &Actor::worker("w1"))
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Store(StoreError::Unavailable(_))));
    assert!(err.is_retryable());
    assert_eq!(snapshot(&engine, &report.id), before);
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Assigned);
}

#[test]
fn test_notifier_failure_does_not_fail_decision() {
    let engine = with_workers(Engine::in_memory().with_notifier(Arc::new(DownNotifier)));
    let (report, proof) = awaiting_verification(&engine);

    engine
        .verify(&report.id, &proof.id, &admin(), Verdict::approve(3))
        .unwrap();
    assert_eq!(engine.get_report(&report.id).unwrap().status, ReportStatus::Closed);
}

#[test]
fn test_notifications_can_be_disabled() {
    let notifier = Arc::new(RecordingNotifier::default());
    let config = EngineConfig {
        notifications_enabled: false,
        ..Default::default()
    };
    let engine = with_workers(
        Engine::new(MemoryStore::new().shared(), config).with_notifier(notifier.clone()),
    );
    let (report, proof) = awaiting_verification(&engine);
    engine
        .verify(&report.id, &proof.id, &admin(), Verdict::approve(3))
        .unwrap();

    assert!(notifier.sent.lock().unwrap().is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_verify_exactly_one_wins() {
    let engine = Arc::new(with_workers(Engine::in_memory()));
    let (report, proof) = awaiting_verification(&engine);
    let barrier = Arc::new(Barrier::new(2));

    let verdicts = [Verdict::approve(5), Verdict::reject("not done")];
    let handles: Vec<_> = verdicts
        .into_iter()
        .map(|verdict| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let report_id = report.id.clone();
            let proof_id = proof.id.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.verify(&report_id, &proof_id, &admin(), verdict)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LifecycleError::AlreadyVerified { .. })));

    assert_eq!(
        engine
            .timeline_of(&report.id, ActionType::Verification)
            .unwrap()
            .len(),
        1
    );
    assert_invariants(&engine, &report.id);
}

#[test]
fn test_concurrent_assign_single_active() {
    let engine = Arc::new(with_workers(Engine::in_memory()));
    let report = engine
        .create_report(&reporter(), new_report(Priority::Urgent))
        .unwrap();
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = ["w1", "w2", "w3"]
        .into_iter()
        .map(|worker| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let report_id = report.id.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.assign(&report_id, worker, &admin(), None)
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(wins, 1);
    assert_invariants(&engine, &report.id);
}
