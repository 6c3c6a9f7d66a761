//! SLA breach detection

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::sla::{SlaPolicy, SlaStatus};
use crate::state::{Actor, Escalation, ReportFilter, ReportId, Severity};

/// Outcome of one sweep over open reports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Open reports inspected
    pub scanned: usize,
    /// Reports past their deadline
    pub breached: usize,
    /// Escalations opened by this sweep
    pub escalated: Vec<Escalation>,
    /// Breached reports left alone because they already carry an open or a
    /// previous automatic escalation
    pub skipped: Vec<ReportId>,
    /// Reports the sweep could not evaluate or escalate; retried next sweep
    pub failed: Vec<ReportId>,
}

impl Engine {
    /// Raise one automatic escalation per open report past its SLA deadline.
    ///
    /// A report is escalated automatically at most once: reports with an
    /// open escalation, or with an automatic one an admin already resolved,
    /// are skipped. Severity follows priority. A failure on one report is
    /// logged and recorded in [`SweepReport::failed`]; the sweep moves on.
    pub fn sweep_sla_breaches(&self) -> LifecycleResult<SweepReport> {
        let policy = self.sla_policy();
        let now = self.now();
        let reports = self.store().list_reports(&ReportFilter::open())?;

        let mut sweep = SweepReport {
            scanned: reports.len(),
            ..Default::default()
        };

        for report in reports {
            let overdue = match policy.overdue_by(report.priority, report.created_at, now) {
                Ok(Some(overdue)) => overdue,
                Ok(None) => continue,
                Err(e) => {
                    warn!(report_id = %report.id, error = %e, "Cannot compute SLA deadline");
                    sweep.failed.push(report.id);
                    continue;
                }
            };
            sweep.breached += 1;

            let reason = format!(
                "SLA breached: {} priority budget of {}h exceeded by {}m",
                report.priority,
                policy.hours(report.priority),
                overdue.num_minutes()
            );
            let report_id = report.id.clone();

            let raised = self.locks().with_report(&report_id, || {
                let report = self.get_report(&report_id)?;
                let escalations = self.store().report_escalations(&report_id)?;
                if escalations.iter().any(|e| !e.resolved || e.is_auto()) {
                    return Ok(None);
                }
                let severity = Severity::for_priority(report.priority);
                self.raise_escalation(report, &reason, severity, None).map(Some)
            });

            match raised {
                Ok(Some(escalation)) => sweep.escalated.push(escalation),
                Ok(None) => sweep.skipped.push(report_id),
                // Closed or flagged between listing and locking
                Err(LifecycleError::ReportLocked { .. })
                | Err(LifecycleError::DuplicateEscalation { .. }) => {
                    debug!(report_id = %report_id, "Report changed during sweep");
                    sweep.skipped.push(report_id);
                }
                Err(e) => {
                    warn!(report_id = %report_id, error = %e, "SLA escalation failed");
                    sweep.failed.push(report_id);
                }
            }
        }

        info!(
            scanned = sweep.scanned,
            breached = sweep.breached,
            escalated = sweep.escalated.len(),
            skipped = sweep.skipped.len(),
            failed = sweep.failed.len(),
            "SLA sweep complete"
        );
        Ok(sweep)
    }

    /// Replace the SLA table. Affects future sweeps only; no report is
    /// reopened or un-escalated.
    pub fn set_sla_policy(&self, admin: &Actor, policy: SlaPolicy) -> LifecycleResult<SlaPolicy> {
        self.require_admin(admin, "change the SLA table")?;
        policy.validate()?;

        let previous = self.replace_sla_policy(policy.clone())?;
        info!(
            admin = %admin.id,
            low = policy.low_hours,
            medium = policy.medium_hours,
            high = policy.high_hours,
            urgent = policy.urgent_hours,
            "SLA policy updated"
        );
        Ok(previous)
    }

    /// Deadline summary for a report under the current table
    pub fn sla_status(&self, report_id: &str) -> LifecycleResult<SlaStatus> {
        let report = self.get_report(report_id)?;
        SlaStatus::compute(
            &self.sla_policy(),
            report.priority,
            report.created_at,
            self.now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::{Clock, ManualClock};
    use crate::state::{EscalationSource, Location, NewReport, Priority, ReportStatus};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn setup() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap(),
        ));
        let engine = Engine::in_memory().with_clock(clock.clone());
        (engine, clock)
    }

    fn file(engine: &Engine, priority: Priority) -> String {
        engine
            .create_report(
                &Actor::citizen("citizen-1"),
                NewReport {
                    title: format!("{} issue", priority),
                    description: String::new(),
                    category: "roads".to_string(),
                    priority,
                    risk_score: 10.0,
                    location: Location::default(),
                },
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_sweep_escalates_only_breached() {
        let (engine, clock) = setup();
        let urgent = file(&engine, Priority::Urgent);
        let low = file(&engine, Priority::Low);

        clock.advance(Duration::hours(25));
        let sweep = engine.sweep_sla_breaches().unwrap();

        assert_eq!(sweep.scanned, 2);
        assert_eq!(sweep.breached, 1);
        assert_eq!(sweep.escalated.len(), 1);

        let escalation = &sweep.escalated[0];
        assert_eq!(escalation.report_id, urgent);
        assert_eq!(escalation.severity, Severity::Critical);
        assert_eq!(escalation.source, EscalationSource::Automatic);
        assert!(escalation.raised_by.is_none());

        assert!(engine.get_report(&urgent).unwrap().escalated);
        assert!(!engine.get_report(&low).unwrap().escalated);

        let entry = engine.timeline(&urgent).unwrap().pop().unwrap();
        assert_eq!(entry.details["is_auto_escalated"], true);
        assert!(entry.actor_id.is_none());
    }

    #[test]
    fn test_deadline_boundary_not_breached() {
        let (engine, clock) = setup();
        file(&engine, Priority::Urgent);

        clock.advance(Duration::hours(24));
        assert!(engine.sweep_sla_breaches().unwrap().escalated.is_empty());

        clock.advance(Duration::seconds(1));
        assert_eq!(engine.sweep_sla_breaches().unwrap().escalated.len(), 1);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let (engine, clock) = setup();
        let report_id = file(&engine, Priority::High);
        clock.advance(Duration::hours(49));

        assert_eq!(engine.sweep_sla_breaches().unwrap().escalated.len(), 1);
        let second = engine.sweep_sla_breaches().unwrap();
        assert!(second.escalated.is_empty());
        assert_eq!(second.skipped, vec![report_id.clone()]);

        // A resolved automatic escalation is not raised again
        let escalation = engine.store().open_escalations(&report_id).unwrap().remove(0);
        engine
            .resolve_escalation(&escalation.id, &Actor::admin("admin-1"), false)
            .unwrap();
        assert!(engine.sweep_sla_breaches().unwrap().escalated.is_empty());
        assert_eq!(engine.store().report_escalations(&report_id).unwrap().len(), 1);
    }

    #[test]
    fn test_policy_change_keeps_resolved_reports_closed() {
        let (engine, clock) = setup();
        let admin = Actor::admin("admin-1");
        let report_id = file(&engine, Priority::Medium);
        let escalation = engine
            .escalate(&report_id, "Duplicate", Severity::Low, &admin)
            .unwrap();
        engine.resolve_escalation(&escalation.id, &admin, true).unwrap();

        let tighter = SlaPolicy {
            medium_hours: 1,
            ..Default::default()
        };
        let previous = engine.set_sla_policy(&admin, tighter).unwrap();
        assert_eq!(previous, SlaPolicy::default());

        clock.advance(Duration::hours(2));
        assert!(engine.sweep_sla_breaches().unwrap().escalated.is_empty());
        assert_eq!(engine.get_report(&report_id).unwrap().status, ReportStatus::Closed);
    }

    #[test]
    fn test_set_sla_policy_validation() {
        let (engine, _clock) = setup();

        let err = engine
            .set_sla_policy(&Actor::citizen("c"), SlaPolicy::default())
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let zero = SlaPolicy {
            urgent_hours: 0,
            ..Default::default()
        };
        let err = engine.set_sla_policy(&Actor::admin("a"), zero).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(engine.sla_policy(), SlaPolicy::default());
    }

    #[test]
    fn test_oversized_sla_rejected_and_deadlines_still_work() {
        let (engine, _clock) = setup();
        let report_id = file(&engine, Priority::Urgent);

        let huge = SlaPolicy {
            urgent_hours: u32::MAX,
            ..Default::default()
        };
        let err = engine.set_sla_policy(&Actor::admin("a"), huge).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(engine.sla_policy(), SlaPolicy::default());

        assert_eq!(engine.sla_status(&report_id).unwrap().remaining_minutes, 24 * 60);
        engine
            .register_worker(&Actor::admin("a"), "w1", "Wren")
            .unwrap();
        engine
            .assign(&report_id, "w1", &Actor::admin("a"), None)
            .unwrap();
        assert!(engine.sweep_sla_breaches().unwrap().failed.is_empty());
    }

    #[test]
    fn test_sla_status_reflects_clock() {
        let (engine, clock) = setup();
        let report_id = file(&engine, Priority::Urgent);

        let status = engine.sla_status(&report_id).unwrap();
        assert!(!status.breached);
        assert_eq!(status.remaining_minutes, 24 * 60);

        clock.advance(Duration::hours(30));
        let status = engine.sla_status(&report_id).unwrap();
        assert!(status.breached);
        assert_eq!(status.overdue_minutes, 6 * 60);
        assert_eq!(status.deadline, clock.now() - Duration::hours(6));
    }
}
