//! Lifecycle engine facade
//!
//! [`Engine`] owns the store handle, the SLA table, the clock, the event bus
//! and the notifier. Component operations live next to their domain logic
//! (`status`, `assignment`, `escalation`, `verifier`, `channel`, `activity`)
//! as `impl Engine` blocks; this module holds construction, intake, archival
//! and the shared commit path.
//!
//! Every state-changing operation follows the same shape:
//!
//! 1. take the report lock
//! 2. load a snapshot and check guards against it
//! 3. build one [`WriteBatch`] holding the record updates, the audit entry and
//!    preconditions restating the guards
//! 4. commit, then publish events and dispatch notifications

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::events::{EventBus, LifecycleEvent, SharedEventBus};
use crate::locks::ReportLocks;
use crate::notify::{dispatch, LogNotifier, Notification, SharedNotifier};
use crate::sla::{Clock, SlaPolicy, SystemClock};
use crate::state::{
    ActionType, Actor, ActivityLogEntry, MemoryStore, NewReport, Precondition, Record, Report,
    ReportFilter, ReportStatus, Role, SharedStore, StoreError, WriteBatch,
};

/// The report lifecycle and escalation engine
pub struct Engine {
    store: SharedStore,
    config: EngineConfig,
    sla: RwLock<SlaPolicy>,
    clock: Arc<dyn Clock>,
    bus: SharedEventBus,
    notifier: SharedNotifier,
    locks: ReportLocks,
}

impl Engine {
    /// Create an engine over `store` with the wall clock and a log notifier
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        let bus = EventBus::with_capacity(config.event_capacity).shared();
        Self {
            store,
            sla: RwLock::new(config.sla.clone()),
            config,
            clock: Arc::new(SystemClock),
            bus,
            notifier: Arc::new(LogNotifier),
            locks: ReportLocks::new(),
        }
    }

    /// Engine over a fresh [`MemoryStore`] with default config
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new().shared(), EngineConfig::default())
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share an existing event bus
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the engine clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Snapshot of the SLA table in force
    pub fn sla_policy(&self) -> SlaPolicy {
        match self.sla.read() {
            Ok(policy) => policy.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn replace_sla_policy(&self, policy: SlaPolicy) -> LifecycleResult<SlaPolicy> {
        let mut current = self.sla.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(std::mem::replace(&mut *current, policy))
    }

    pub(crate) fn locks(&self) -> &ReportLocks {
        &self.locks
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Load a report or fail with `NotFound`
    pub fn get_report(&self, report_id: &str) -> LifecycleResult<Report> {
        self.store
            .get_report(report_id)?
            .ok_or_else(|| LifecycleError::not_found("report", report_id))
    }

    pub fn list_reports(&self, filter: &ReportFilter) -> LifecycleResult<Vec<Report>> {
        Ok(self.store.list_reports(filter)?)
    }

    pub(crate) fn require_admin(&self, actor: &Actor, action: &'static str) -> LifecycleResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(LifecycleError::Forbidden {
                actor_id: actor.id.clone(),
                role: actor.role,
                action,
            })
        }
    }

    /// Commit a batch, translating a failed precondition into the error kind
    /// the same guard would have produced against a fresh snapshot.
    ///
    /// `target` is the status the operation was moving to, if any.
    pub(crate) fn commit(
        &self,
        batch: WriteBatch,
        actor: Option<&Actor>,
        target: Option<ReportStatus>,
    ) -> LifecycleResult<()> {
        match self.store.commit(batch) {
            Ok(()) => Ok(()),
            Err(StoreError::PreconditionFailed(precondition)) => {
                debug!(%precondition, "Commit rejected by precondition");
                Err(self.conflict(precondition, actor, target))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn conflict(
        &self,
        precondition: Precondition,
        actor: Option<&Actor>,
        target: Option<ReportStatus>,
    ) -> LifecycleError {
        match precondition {
            Precondition::ReportStatus {
                report_id,
                expected,
            } => match self.store.get_report(&report_id) {
                Ok(Some(report)) if report.is_closed() => {
                    LifecycleError::ReportLocked { report_id }
                }
                Ok(Some(report)) => LifecycleError::InvalidTransition {
                    report_id,
                    from: report.status,
                    to: target.unwrap_or(expected),
                },
                Ok(None) => LifecycleError::not_found("report", report_id),
                Err(e) => e.into(),
            },
            Precondition::ProofOutcome { proof_id, .. } => {
                LifecycleError::AlreadyVerified { proof_id }
            }
            Precondition::NoOpenEscalation { report_id } => {
                let escalation_id = self
                    .store
                    .open_escalations(&report_id)
                    .ok()
                    .and_then(|open| open.into_iter().next())
                    .map(|e| e.id)
                    .unwrap_or_default();
                LifecycleError::DuplicateEscalation {
                    report_id,
                    escalation_id,
                }
            }
            Precondition::EscalationOpen { escalation_id } => {
                LifecycleError::EscalationResolved { escalation_id }
            }
            Precondition::NoActiveAssignment { report_id } => {
                let worker_id = self
                    .store
                    .active_assignment(&report_id)
                    .ok()
                    .flatten()
                    .map(|a| a.worker_id)
                    .unwrap_or_default();
                LifecycleError::AlreadyAssigned {
                    report_id,
                    worker_id,
                }
            }
            Precondition::ActiveAssignment { report_id, .. } => {
                LifecycleError::NotAssignedWorker {
                    report_id,
                    actor_id: actor.map(|a| a.id.clone()).unwrap_or_default(),
                }
            }
        }
    }

    /// Publish events that describe an already committed change
    pub(crate) fn publish(&self, events: Vec<LifecycleEvent>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    /// Dispatch notifications for an already committed decision
    pub(crate) fn notify(&self, notifications: Vec<Notification>) {
        if !self.config.notifications_enabled {
            return;
        }
        for notification in &notifications {
            dispatch(self.notifier.as_ref(), notification);
        }
    }

    // ------------------------------------------------------------------
    // Intake and archival
    // ------------------------------------------------------------------

    /// File a new report on behalf of a citizen (or an admin)
    pub fn create_report(&self, actor: &Actor, input: NewReport) -> LifecycleResult<Report> {
        if actor.role == Role::Worker {
            return Err(LifecycleError::Forbidden {
                actor_id: actor.id.clone(),
                role: actor.role,
                action: "create reports",
            });
        }
        if input.title.trim().is_empty() {
            return Err(LifecycleError::invalid_input("title must not be empty"));
        }

        let now = self.now();
        let report = Report::new(actor.id.clone(), input, now);

        let mut batch = WriteBatch::new();
        batch.put(Record::Report(report.clone())).append_log(ActivityLogEntry::new(
            report.id.clone(),
            Some(actor.id.clone()),
            ActionType::ReportCreated,
            json!({
                "priority": report.priority,
                "category": report.category,
                "risk_score": report.risk_score,
                "status": report.status,
            }),
            now,
        ));
        self.commit(batch, Some(actor), None)?;

        info!(
            report_id = %report.id,
            reporter = %actor.id,
            priority = %report.priority,
            risk_score = report.risk_score,
            "Report created"
        );
        self.publish(vec![LifecycleEvent::ReportCreated {
            report_id: report.id.clone(),
            priority: report.priority,
            timestamp: now,
        }]);

        Ok(report)
    }

    /// Hide a closed report from default listings. Status is untouched.
    pub fn archive_report(&self, report_id: &str, admin: &Actor) -> LifecycleResult<Report> {
        self.require_admin(admin, "archive reports")?;

        self.locks.with_report(report_id, || {
            let mut report = self.get_report(report_id)?;
            if !report.is_closed() {
                return Err(LifecycleError::invalid_input(format!(
                    "report {} must be closed before it is archived (status: {})",
                    report_id, report.status
                )));
            }
            if report.archived {
                return Ok(report);
            }

            let now = self.now();
            report.archived = true;
            report.updated_at = now;

            let mut batch = WriteBatch::new();
            batch
                .expect(Precondition::ReportStatus {
                    report_id: report.id.clone(),
                    expected: ReportStatus::Closed,
                })
                .put(Record::Report(report.clone()))
                .append_log(ActivityLogEntry::new(
                    report.id.clone(),
                    Some(admin.id.clone()),
                    ActionType::ReportArchived,
                    json!({ "status": report.status }),
                    now,
                ));
            self.commit(batch, Some(admin), None)?;

            info!(report_id = %report.id, admin = %admin.id, "Report archived");
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Location, Priority};

    fn input(title: &str) -> NewReport {
        NewReport {
            title: title.to_string(),
            description: "Water pooling across the road".to_string(),
            category: "drainage".to_string(),
            priority: Priority::Medium,
            risk_score: 140.0,
            location: Location::default(),
        }
    }

    #[test]
    fn test_create_report_logs_creation() {
        let engine = Engine::in_memory();
        let citizen = Actor::citizen("citizen-1");

        let report = engine.create_report(&citizen, input("Flooded drain")).unwrap();
        assert_eq!(report.status, ReportStatus::Reported);
        assert_eq!(report.risk_score, 100);

        let log = engine.store().report_activity(&report.id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, ActionType::ReportCreated);
        assert_eq!(log[0].actor_id.as_deref(), Some("citizen-1"));
    }

    #[test]
    fn test_create_report_validation() {
        let engine = Engine::in_memory();

        let err = engine
            .create_report(&Actor::citizen("c"), input("   "))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let err = engine
            .create_report(&Actor::worker("w"), input("Flooded drain"))
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_archive_requires_closed_report() {
        let engine = Engine::in_memory();
        let report = engine
            .create_report(&Actor::citizen("c"), input("Flooded drain"))
            .unwrap();

        let err = engine
            .archive_report(&report.id, &Actor::admin("a"))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let err = engine
            .archive_report(&report.id, &Actor::citizen("c"))
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_missing_report_is_not_found() {
        let engine = Engine::in_memory();
        let err = engine.get_report("nope").unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { kind: "report", .. }));
    }
}
