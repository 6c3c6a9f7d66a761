//! Assignment manager
//!
//! Binds workers to reports. A report has at most one active assignment;
//! deactivated assignments are kept as history (they decide who may still
//! read the worker channel).
//!
//! Worker availability is a cooldown marker: a worker flips to `busy` when
//! assigned and back to `available` when their last active assignment ends.
//! The stored flag is a hint; [`Engine::worker_load`] recomputes it from the
//! active assignments. Workload is advisory and never caps assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::events::LifecycleEvent;
use crate::notify::{Notification, NotificationKind};
use crate::state::{
    ActionType, Actor, ActorId, ActivityLogEntry, Assignment, Precondition, Record, Report,
    ReportStatus, WorkerAvailability, WorkerProfile, WriteBatch,
};
use crate::status::{self, Trigger};

/// Active workload of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLoad {
    pub worker_id: ActorId,
    pub display_name: String,
    pub availability: WorkerAvailability,
    pub active_assignments: usize,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

/// Records produced by moving a report to a new worker. Shared by direct
/// reassignment and escalation-driven reassignment, which differ only in the
/// audit entry and the escalation they resolve alongside.
pub(crate) struct ReassignPlan {
    pub report: Report,
    pub from: ReportStatus,
    pub previous: Option<Assignment>,
    pub assignment: Assignment,
    workers: Vec<WorkerProfile>,
    preconditions: Vec<Precondition>,
}

impl ReassignPlan {
    /// Audit details describing the move
    pub fn details(&self, reason: &str) -> serde_json::Value {
        let mut details = status::status_details(self.from, self.report.status);
        details["reason"] = json!(reason);
        details["assignment_id"] = json!(self.assignment.id);
        details["worker_id"] = json!(self.assignment.worker_id);
        details["previous_worker_id"] = json!(self.previous.as_ref().map(|a| &a.worker_id));
        details
    }

    /// Add preconditions and record updates (the report last, so callers
    /// may still adjust it before this call)
    pub fn write_into(&self, batch: &mut WriteBatch) {
        for precondition in &self.preconditions {
            batch.expect(precondition.clone());
        }
        if let Some(previous) = &self.previous {
            batch.put(Record::Assignment(previous.clone()));
        }
        batch.put(Record::Assignment(self.assignment.clone()));
        for worker in &self.workers {
            batch.put(Record::Worker(worker.clone()));
        }
        batch.put(Record::Report(self.report.clone()));
    }

    /// Events to publish once the plan is committed
    pub fn events(&self, now: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let mut events = vec![LifecycleEvent::WorkerAssigned {
            report_id: self.report.id.clone(),
            worker_id: self.assignment.worker_id.clone(),
            previous_worker: self.previous.as_ref().map(|a| a.worker_id.clone()),
            timestamp: now,
        }];
        if self.from != self.report.status {
            events.push(LifecycleEvent::StatusChanged {
                report_id: self.report.id.clone(),
                from: self.from,
                to: self.report.status,
                timestamp: now,
            });
        }
        events
    }

    /// Notifications to both the new and the displaced worker
    pub fn notifications(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut notifications = vec![assigned_notification(&self.report, &self.assignment, now)];
        if let Some(previous) = &self.previous {
            notifications.push(Notification::for_report(
                previous.worker_id.clone(),
                &self.report.id,
                NotificationKind::WorkerRemoved,
                "Removed from report",
                format!("\"{}\" has been reassigned to another worker", self.report.title),
                now,
            ));
        }
        notifications
    }
}

fn assigned_notification(
    report: &Report,
    assignment: &Assignment,
    now: DateTime<Utc>,
) -> Notification {
    Notification::for_report(
        assignment.worker_id.clone(),
        &report.id,
        NotificationKind::WorkerAssigned,
        "New assignment",
        format!("You have been assigned \"{}\"", report.title),
        now,
    )
}

impl Engine {
    /// Register a worker, or update the display name of a known one
    pub fn register_worker(
        &self,
        admin: &Actor,
        worker_id: &str,
        display_name: &str,
    ) -> LifecycleResult<WorkerProfile> {
        self.require_admin(admin, "register workers")?;
        if worker_id.trim().is_empty() {
            return Err(LifecycleError::invalid_input("worker id must not be empty"));
        }

        let profile = match self.store().get_worker(worker_id)? {
            Some(mut existing) => {
                existing.display_name = display_name.to_string();
                existing
            }
            None => WorkerProfile::new(worker_id, display_name),
        };

        let mut batch = WriteBatch::new();
        batch.put(Record::Worker(profile.clone()));
        self.commit(batch, Some(admin), None)?;

        info!(worker_id, "Worker registered");
        Ok(profile)
    }

    fn load_worker(&self, worker_id: &str) -> LifecycleResult<WorkerProfile> {
        self.store()
            .get_worker(worker_id)?
            .ok_or_else(|| LifecycleError::not_found("worker", worker_id))
    }

    /// The worker marked busy as of `now`
    fn claim_worker(&self, worker_id: &str, now: DateTime<Utc>) -> LifecycleResult<WorkerProfile> {
        let mut worker = self.load_worker(worker_id)?;
        worker.availability = WorkerAvailability::Busy;
        worker.last_assigned_at = Some(now);
        Ok(worker)
    }

    /// The worker's profile once `released` stops being active, if that
    /// leaves them with no active assignment
    pub(crate) fn release_worker(
        &self,
        released: &Assignment,
    ) -> LifecycleResult<Option<WorkerProfile>> {
        let still_active = self
            .store()
            .worker_assignments(&released.worker_id)?
            .iter()
            .any(|a| a.active && a.id != released.id);
        if still_active {
            return Ok(None);
        }
        Ok(self.store().get_worker(&released.worker_id)?.map(|mut w| {
            w.availability = WorkerAvailability::Available;
            w
        }))
    }

    /// Bind a worker to a report with no active assignment.
    ///
    /// Moves `reported` (first assignment) or `reopened` (after a
    /// verify-reassign) to `assigned`. The assignment deadline defaults to
    /// the report's SLA deadline.
    pub fn assign(
        &self,
        report_id: &str,
        worker_id: &str,
        assigner: &Actor,
        deadline: Option<DateTime<Utc>>,
    ) -> LifecycleResult<Assignment> {
        self.require_admin(assigner, "assign reports")?;

        self.locks().with_report(report_id, || {
            let mut report = self.get_report(report_id)?;
            if report.is_closed() {
                return Err(LifecycleError::ReportLocked {
                    report_id: report_id.to_string(),
                });
            }
            if let Some(active) = self.store().active_assignment(report_id)? {
                return Err(LifecycleError::AlreadyAssigned {
                    report_id: report_id.to_string(),
                    worker_id: active.worker_id,
                });
            }
            let from = report.status;
            status::validate(report_id, from, ReportStatus::Assigned, Trigger::Direct)?;

            let now = self.now();
            let worker = self.claim_worker(worker_id, now)?;
            let deadline = match deadline {
                Some(at) => at,
                None => self.sla_policy().deadline(report.priority, report.created_at)?,
            };
            let assignment =
                Assignment::new(report_id, worker_id, assigner.id.clone(), Some(deadline), now);

            report.status = ReportStatus::Assigned;
            report.updated_at = now;

            let mut details = status::status_details(from, report.status);
            details["assignment_id"] = json!(assignment.id);
            details["worker_id"] = json!(worker_id);
            details["deadline"] = json!(assignment.deadline);

            let mut batch = WriteBatch::new();
            batch
                .expect(Precondition::ReportStatus {
                    report_id: report.id.clone(),
                    expected: from,
                })
                .expect(Precondition::NoActiveAssignment {
                    report_id: report.id.clone(),
                })
                .put(Record::Assignment(assignment.clone()))
                .put(Record::Worker(worker))
                .put(Record::Report(report.clone()))
                .append_log(ActivityLogEntry::new(
                    report.id.clone(),
                    Some(assigner.id.clone()),
                    ActionType::WorkerAssigned,
                    details,
                    now,
                ));
            self.commit(batch, Some(assigner), Some(ReportStatus::Assigned))?;

            info!(
                report_id,
                worker_id,
                assignment_id = %assignment.id,
                %from,
                "Worker assigned"
            );
            self.publish(vec![
                LifecycleEvent::WorkerAssigned {
                    report_id: report.id.clone(),
                    worker_id: worker_id.to_string(),
                    previous_worker: None,
                    timestamp: now,
                },
                LifecycleEvent::StatusChanged {
                    report_id: report.id.clone(),
                    from,
                    to: report.status,
                    timestamp: now,
                },
            ]);
            self.notify(vec![assigned_notification(&report, &assignment, now)]);
            Ok(assignment)
        })
    }

    /// Plan moving `report` to `worker_id`. Caller holds the report lock.
    ///
    /// Allowed with an active assignment (from `assigned` or `in_progress`)
    /// or from `reopened`. A report awaiting verification is reassigned
    /// through the verify decision instead.
    pub(crate) fn plan_reassign(
        &self,
        mut report: Report,
        worker_id: &str,
        assigner: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<ReassignPlan> {
        let from = report.status;
        status::validate(&report.id, from, ReportStatus::Assigned, Trigger::Reassignment)?;

        let mut preconditions = vec![Precondition::ReportStatus {
            report_id: report.id.clone(),
            expected: from,
        }];
        let mut workers = Vec::new();

        let previous = match self.store().active_assignment(&report.id)? {
            Some(mut active) => {
                if active.worker_id == worker_id {
                    return Err(LifecycleError::AlreadyAssigned {
                        report_id: report.id.clone(),
                        worker_id: active.worker_id,
                    });
                }
                preconditions.push(Precondition::ActiveAssignment {
                    report_id: report.id.clone(),
                    assignment_id: active.id.clone(),
                });
                active.deactivate(format!("reassigned: {}", reason), now);
                workers.extend(self.release_worker(&active)?);
                Some(active)
            }
            None if from == ReportStatus::Reopened => {
                preconditions.push(Precondition::NoActiveAssignment {
                    report_id: report.id.clone(),
                });
                None
            }
            None => {
                return Err(LifecycleError::InvalidTransition {
                    report_id: report.id.clone(),
                    from,
                    to: ReportStatus::Assigned,
                })
            }
        };

        workers.push(self.claim_worker(worker_id, now)?);
        let deadline = self.sla_policy().deadline(report.priority, report.created_at)?;
        let assignment = Assignment::new(
            report.id.clone(),
            worker_id,
            assigner.id.clone(),
            Some(deadline),
            now,
        );

        report.status = ReportStatus::Assigned;
        report.updated_at = now;

        Ok(ReassignPlan {
            report,
            from,
            previous,
            assignment,
            workers,
            preconditions,
        })
    }

    /// Move a report to another worker, recording why
    pub fn reassign(
        &self,
        report_id: &str,
        worker_id: &str,
        assigner: &Actor,
        reason: &str,
    ) -> LifecycleResult<Assignment> {
        self.require_admin(assigner, "reassign reports")?;
        if reason.trim().is_empty() {
            return Err(LifecycleError::invalid_input("reassignment reason must not be empty"));
        }

        self.locks().with_report(report_id, || {
            let report = self.get_report(report_id)?;
            let now = self.now();
            let plan = self.plan_reassign(report, worker_id, assigner, reason, now)?;

            let mut batch = WriteBatch::new();
            plan.write_into(&mut batch);
            batch.append_log(ActivityLogEntry::new(
                report_id,
                Some(assigner.id.clone()),
                ActionType::WorkerReassigned,
                plan.details(reason),
                now,
            ));
            self.commit(batch, Some(assigner), Some(ReportStatus::Assigned))?;

            info!(
                report_id,
                worker_id,
                previous = ?plan.previous.as_ref().map(|a| &a.worker_id),
                reason,
                "Report reassigned"
            );
            self.publish(plan.events(now));
            self.notify(plan.notifications(now));
            Ok(plan.assignment)
        })
    }

    /// Active workload of one worker.
    ///
    /// Availability is derived from the active assignments rather than read
    /// from the stored profile. Profiles are written under report locks, so
    /// two reports sharing a worker can race on the stored flag.
    pub fn worker_load(&self, worker_id: &str) -> LifecycleResult<WorkerLoad> {
        let worker = self.load_worker(worker_id)?;
        let active = self
            .store()
            .worker_assignments(worker_id)?
            .into_iter()
            .filter(|a| a.active)
            .count();
        let availability = if active > 0 {
            WorkerAvailability::Busy
        } else {
            WorkerAvailability::Available
        };
        if availability != worker.availability {
            debug!(worker_id, stored = ?worker.availability, "Stored availability is stale");
        }
        Ok(WorkerLoad {
            worker_id: worker.id,
            display_name: worker.display_name,
            availability,
            active_assignments: active,
            last_assigned_at: worker.last_assigned_at,
        })
    }

    /// Every worker's load, least loaded first; ties go to the worker idle
    /// the longest
    pub fn workload_overview(&self) -> LifecycleResult<Vec<WorkerLoad>> {
        let mut loads = self
            .store()
            .list_workers()?
            .iter()
            .map(|w| self.worker_load(&w.id))
            .collect::<LifecycleResult<Vec<_>>>()?;
        loads.sort_by(|a, b| {
            a.active_assignments
                .cmp(&b.active_assignments)
                .then(a.last_assigned_at.cmp(&b.last_assigned_at))
        });
        debug!(workers = loads.len(), "Workload overview computed");
        Ok(loads)
    }
}
