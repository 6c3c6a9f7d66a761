//! Raising and resolving escalations

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::events::LifecycleEvent;
use crate::notify::{Notification, NotificationKind};
use crate::state::{
    new_id, ActionType, Actor, ActivityLogEntry, Assignment, Escalation, EscalationSource,
    Precondition, ProofOutcome, Record, Report, ReportStatus, Role, Severity,
    VerificationDecision, WriteBatch,
};

/// Review comment left on a pending proof when its report is closed through
/// an escalation
const SUPERSEDED_COMMENT: &str = "superseded: report closed with escalation";
use crate::status::{self, Trigger};

/// Who may flag a report manually: admins, the reporter, and any worker who
/// has ever been assigned to it
pub(crate) fn may_escalate(actor: &Actor, report: &Report, history: &[Assignment]) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Citizen => actor.id == report.reporter_id,
        Role::Worker => history.iter().any(|a| a.worker_id == actor.id),
    }
}

impl Engine {
    /// Manually flag a report
    pub fn escalate(
        &self,
        report_id: &str,
        reason: &str,
        severity: Severity,
        actor: &Actor,
    ) -> LifecycleResult<Escalation> {
        if reason.trim().is_empty() {
            return Err(LifecycleError::invalid_input("escalation reason must not be empty"));
        }

        self.locks().with_report(report_id, || {
            let report = self.get_report(report_id)?;
            let history = self.store().report_assignments(report_id)?;
            if !may_escalate(actor, &report, &history) {
                return Err(LifecycleError::Forbidden {
                    actor_id: actor.id.clone(),
                    role: actor.role,
                    action: "escalate this report",
                });
            }
            self.raise_escalation(report, reason, severity, Some(actor))
        })
    }

    /// Open an escalation on `report`. Caller holds the report lock.
    ///
    /// `actor == None` marks an automatic (SLA) escalation. The audit entry
    /// carries the escalation id as its causation id, as do the entries that
    /// later resolve it.
    pub(crate) fn raise_escalation(
        &self,
        mut report: Report,
        reason: &str,
        severity: Severity,
        actor: Option<&Actor>,
    ) -> LifecycleResult<Escalation> {
        if report.is_closed() {
            return Err(LifecycleError::ReportLocked {
                report_id: report.id.clone(),
            });
        }
        if let Some(open) = self.store().open_escalations(&report.id)?.into_iter().next() {
            return Err(LifecycleError::DuplicateEscalation {
                report_id: report.id.clone(),
                escalation_id: open.id,
            });
        }

        let now = self.now();
        let escalation = Escalation {
            id: new_id(),
            report_id: report.id.clone(),
            reason: reason.trim().to_string(),
            severity,
            source: if actor.is_some() {
                EscalationSource::Manual
            } else {
                EscalationSource::Automatic
            },
            raised_by: actor.map(|a| a.id.clone()),
            resolved: false,
            resolved_by: None,
            created_at: now,
            resolved_at: None,
        };
        let status = report.status;
        report.escalated = true;
        report.updated_at = now;

        let mut batch = WriteBatch::new();
        batch
            .expect(Precondition::ReportStatus {
                report_id: report.id.clone(),
                expected: status,
            })
            .expect(Precondition::NoOpenEscalation {
                report_id: report.id.clone(),
            })
            .put(Record::Escalation(escalation.clone()))
            .put(Record::Report(report.clone()))
            .append_log(
                ActivityLogEntry::new(
                    report.id.clone(),
                    actor.map(|a| a.id.clone()),
                    ActionType::Escalated,
                    json!({
                        "escalation_id": escalation.id,
                        "reason": escalation.reason,
                        "severity": escalation.severity,
                        "status": status,
                        "is_auto_escalated": escalation.is_auto(),
                    }),
                    now,
                )
                .with_causation(escalation.id.clone()),
            );
        self.commit(batch, actor, None)?;

        if escalation.is_auto() {
            warn!(
                report_id = %report.id,
                escalation_id = %escalation.id,
                severity = %severity,
                reason = %escalation.reason,
                "Report auto-escalated"
            );
        } else {
            info!(
                report_id = %report.id,
                escalation_id = %escalation.id,
                severity = %severity,
                raised_by = ?escalation.raised_by,
                "Report escalated"
            );
        }
        self.publish(vec![LifecycleEvent::EscalationRaised {
            report_id: report.id.clone(),
            escalation_id: escalation.id.clone(),
            severity,
            automatic: escalation.is_auto(),
            timestamp: now,
        }]);
        Ok(escalation)
    }

    fn load_open_escalation(&self, escalation_id: &str) -> LifecycleResult<Escalation> {
        let escalation = self
            .store()
            .get_escalation(escalation_id)?
            .ok_or_else(|| LifecycleError::not_found("escalation", escalation_id))?;
        if escalation.resolved {
            return Err(LifecycleError::EscalationResolved {
                escalation_id: escalation_id.to_string(),
            });
        }
        Ok(escalation)
    }

    /// Mark `escalation` resolved and recompute the report's flag from the
    /// escalations that stay open
    fn settle(
        &self,
        escalation: &mut Escalation,
        report: &mut Report,
        admin: &Actor,
        now: DateTime<Utc>,
    ) -> LifecycleResult<()> {
        escalation.resolved = true;
        escalation.resolved_by = Some(admin.id.clone());
        escalation.resolved_at = Some(now);

        report.escalated = self
            .store()
            .open_escalations(&report.id)?
            .iter()
            .any(|e| e.id != escalation.id);
        report.updated_at = now;
        Ok(())
    }

    /// Resolve an escalation, optionally closing its report.
    ///
    /// Closing works from any open status and stamps `resolved_at`. A proof
    /// still pending review is settled as rejected by the resolving admin. A
    /// report that is already closed stays closed; it is never reopened.
    pub fn resolve_escalation(
        &self,
        escalation_id: &str,
        admin: &Actor,
        close_report: bool,
    ) -> LifecycleResult<Escalation> {
        self.require_admin(admin, "resolve escalations")?;
        let report_id = self.load_open_escalation(escalation_id)?.report_id;

        self.locks().with_report(&report_id, || {
            let mut escalation = self.load_open_escalation(escalation_id)?;
            let mut report = self.get_report(&report_id)?;
            let from = report.status;
            let now = self.now();

            self.settle(&mut escalation, &mut report, admin, now)?;

            let mut batch = WriteBatch::new();
            batch
                .expect(Precondition::EscalationOpen {
                    escalation_id: escalation.id.clone(),
                })
                .expect(Precondition::ReportStatus {
                    report_id: report.id.clone(),
                    expected: from,
                });

            let closing = close_report && !report.is_closed();
            let mut superseded = Vec::new();
            if closing {
                status::validate(
                    &report.id,
                    from,
                    ReportStatus::Closed,
                    Trigger::EscalationClosure,
                )?;
                report.status = ReportStatus::Closed;
                report.resolved_at = Some(now);
                if let Some(mut active) = self.store().active_assignment(&report.id)? {
                    batch.expect(Precondition::ActiveAssignment {
                        report_id: report.id.clone(),
                        assignment_id: active.id.clone(),
                    });
                    active.deactivate("closed with escalation", now);
                    if let Some(worker) = self.release_worker(&active)? {
                        batch.put(Record::Worker(worker));
                    }
                    batch.put(Record::Assignment(active));
                }
                for mut proof in self.store().report_proofs(&report.id)? {
                    if proof.outcome != ProofOutcome::Pending {
                        continue;
                    }
                    batch.expect(Precondition::ProofOutcome {
                        proof_id: proof.id.clone(),
                        expected: ProofOutcome::Pending,
                    });
                    proof.outcome = ProofOutcome::Rejected;
                    proof.decision = Some(VerificationDecision::Rejected);
                    proof.verified_by = Some(admin.id.clone());
                    proof.verified_at = Some(now);
                    proof.review_comment = Some(SUPERSEDED_COMMENT.to_string());
                    superseded.push(proof.id.clone());
                    batch.put(Record::Proof(proof));
                }
            }

            let mut details = status::status_details(from, report.status);
            details["escalation_id"] = json!(escalation.id);
            details["closed_report"] = json!(closing);
            details["superseded_proofs"] = json!(superseded);
            details["still_escalated"] = json!(report.escalated);

            batch
                .put(Record::Escalation(escalation.clone()))
                .put(Record::Report(report.clone()))
                .append_log(
                    ActivityLogEntry::new(
                        report.id.clone(),
                        Some(admin.id.clone()),
                        ActionType::EscalationResolved,
                        details,
                        now,
                    )
                    .with_causation(escalation.id.clone()),
                );
            self.commit(batch, Some(admin), closing.then_some(ReportStatus::Closed))?;

            info!(
                report_id = %report.id,
                escalation_id,
                closed_report = closing,
                superseded_proofs = superseded.len(),
                admin = %admin.id,
                "Escalation resolved"
            );

            let mut events = vec![LifecycleEvent::EscalationResolved {
                report_id: report.id.clone(),
                escalation_id: escalation.id.clone(),
                timestamp: now,
            }];
            if closing {
                events.push(LifecycleEvent::StatusChanged {
                    report_id: report.id.clone(),
                    from,
                    to: ReportStatus::Closed,
                    timestamp: now,
                });
                self.notify(vec![Notification::for_report(
                    report.reporter_id.clone(),
                    &report.id,
                    NotificationKind::ReportResolved,
                    "Report closed",
                    format!("\"{}\" was closed by an administrator", report.title),
                    now,
                )]);
            }
            self.publish(events);
            Ok(escalation)
        })
    }

    /// Reassign the escalated report and resolve the escalation in one
    /// write, logged as a single combined entry
    pub fn reassign_from_escalation(
        &self,
        escalation_id: &str,
        worker_id: &str,
        admin: &Actor,
    ) -> LifecycleResult<Assignment> {
        self.require_admin(admin, "reassign reports")?;
        let report_id = self.load_open_escalation(escalation_id)?.report_id;

        self.locks().with_report(&report_id, || {
            let mut escalation = self.load_open_escalation(escalation_id)?;
            let report = self.get_report(&report_id)?;
            let now = self.now();
            let reason = format!("escalation: {}", escalation.reason);

            let mut plan = self.plan_reassign(report, worker_id, admin, &reason, now)?;
            self.settle(&mut escalation, &mut plan.report, admin, now)?;

            let causation_id = escalation.id.clone();
            let mut details = plan.details(&reason);
            details["escalation_id"] = json!(escalation.id);
            details["still_escalated"] = json!(plan.report.escalated);

            let mut batch = WriteBatch::new();
            batch.expect(Precondition::EscalationOpen {
                escalation_id: escalation.id.clone(),
            });
            plan.write_into(&mut batch);
            batch.put(Record::Escalation(escalation.clone())).append_log(
                ActivityLogEntry::new(
                    report_id.clone(),
                    Some(admin.id.clone()),
                    ActionType::EscalationReassigned,
                    details,
                    now,
                )
                .with_causation(causation_id.clone()),
            );
            self.commit(batch, Some(admin), Some(ReportStatus::Assigned))?;

            info!(
                report_id = %report_id,
                escalation_id,
                worker_id,
                %causation_id,
                "Escalated report reassigned"
            );
            let mut events = plan.events(now);
            events.push(LifecycleEvent::EscalationResolved {
                report_id: report_id.clone(),
                escalation_id: escalation.id.clone(),
                timestamp: now,
            });
            self.publish(events);
            self.notify(plan.notifications(now));
            Ok(plan.assignment)
        })
    }
}
