//! Report status state machine
//!
//! ```text
//! reported ──▶ assigned ──▶ in_progress ──▶ awaiting_verification ──▶ closed
//!                 ▲                               │
//!                 └────────── reopened ◀──────────┘
//! ```
//!
//! Edges are tagged with the [`Trigger`] allowed to take them. Only
//! [`Trigger::Direct`] edges are reachable through [`Engine::transition`];
//! the rest belong to proof submission, verification, reassignment and
//! escalation closure.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::engine::Engine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::events::LifecycleEvent;
use crate::state::{
    ActionType, Actor, ActivityLogEntry, Precondition, Record, ReportStatus, WriteBatch,
};

/// What is driving a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Public transition call
    Direct,
    /// A worker submitted a resolution proof
    ProofSubmitted,
    /// An admin approved the pending proof
    ProofApproved,
    /// An admin rejected the pending proof
    ProofRejected,
    /// An admin moved the work to another worker
    Reassignment,
    /// An admin closed the report while resolving an escalation
    EscalationClosure,
}

/// Whether `from -> to` is an edge for `trigger`. Closed reports have no
/// outgoing edges.
pub fn allows(from: ReportStatus, to: ReportStatus, trigger: Trigger) -> bool {
    use ReportStatus::*;

    if from.is_terminal() {
        return false;
    }
    match trigger {
        Trigger::Direct => matches!(
            (from, to),
            (Reported, Assigned) | (Reopened, Assigned) | (Assigned, InProgress)
        ),
        Trigger::ProofSubmitted => {
            matches!(from, InProgress | Reopened) && to == AwaitingVerification
        }
        Trigger::ProofApproved => from == AwaitingVerification && to == Closed,
        Trigger::ProofRejected => from == AwaitingVerification && to == Reopened,
        Trigger::Reassignment => match to {
            Assigned => matches!(from, Reported | Assigned | InProgress | Reopened),
            Reopened => from == AwaitingVerification,
            _ => false,
        },
        Trigger::EscalationClosure => to == Closed,
    }
}

/// Check an edge, producing the error the caller should surface
pub fn validate(
    report_id: &str,
    from: ReportStatus,
    to: ReportStatus,
    trigger: Trigger,
) -> LifecycleResult<()> {
    if from.is_terminal() {
        return Err(LifecycleError::ReportLocked {
            report_id: report_id.to_string(),
        });
    }
    if allows(from, to, trigger) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition {
            report_id: report_id.to_string(),
            from,
            to,
        })
    }
}

/// Audit details shared by every entry that changes status
pub(crate) fn status_details(from: ReportStatus, to: ReportStatus) -> serde_json::Value {
    json!({ "from": from, "to": to })
}

impl Engine {
    /// Move a report along a direct edge.
    ///
    /// - `reported|reopened -> assigned` (admin): needs an active assignment
    /// - `assigned -> in_progress`: actor must be the assigned worker
    ///
    /// Every other target fails with `InvalidTransition`; a closed report
    /// fails with `ReportLocked`. Nothing is written on failure.
    pub fn transition(
        &self,
        report_id: &str,
        target: ReportStatus,
        actor: &Actor,
    ) -> LifecycleResult<crate::state::Report> {
        self.locks().with_report(report_id, || {
            let mut report = self.get_report(report_id)?;
            let from = report.status;
            validate(report_id, from, target, Trigger::Direct)?;

            let active = self.store().active_assignment(report_id)?;
            let assignment = match target {
                ReportStatus::Assigned => {
                    self.require_admin(actor, "assign reports")?;
                    active.ok_or_else(|| LifecycleError::InvalidTransition {
                        report_id: report_id.to_string(),
                        from,
                        to: target,
                    })?
                }
                _ => match active {
                    Some(a) if a.worker_id == actor.id => a,
                    _ => {
                        return Err(LifecycleError::NotAssignedWorker {
                            report_id: report_id.to_string(),
                            actor_id: actor.id.clone(),
                        })
                    }
                },
            };

            let now = self.now();
            report.status = target;
            report.updated_at = now;

            let mut details = status_details(from, target);
            details["assignment_id"] = json!(assignment.id);

            let mut batch = WriteBatch::new();
            batch
                .expect(Precondition::ReportStatus {
                    report_id: report.id.clone(),
                    expected: from,
                })
                .expect(Precondition::ActiveAssignment {
                    report_id: report.id.clone(),
                    assignment_id: assignment.id.clone(),
                })
                .put(Record::Report(report.clone()))
                .append_log(ActivityLogEntry::new(
                    report.id.clone(),
                    Some(actor.id.clone()),
                    ActionType::StatusChanged,
                    details,
                    now,
                ));
            self.commit(batch, Some(actor), Some(target))?;

            info!(report_id, %from, to = %target, actor = %actor.id, "Status changed");
            self.publish(vec![LifecycleEvent::StatusChanged {
                report_id: report.id.clone(),
                from,
                to: target,
                timestamp: now,
            }]);
            Ok(report)
        })
    }
}
