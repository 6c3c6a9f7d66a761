//! Resolution proof verification
//!
//! A worker closes out their part by submitting a proof; an admin decides on
//! it exactly once. Proofs are bound to the report's proof cycle, which
//! advances every time a decision reopens the report.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::engine::Engine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::events::LifecycleEvent;
use crate::notify::{Notification, NotificationKind};
use crate::state::{
    new_id, ActionType, Actor, ActivityLogEntry, Precondition, ProofOutcome, Record,
    ReportStatus, ResolutionProof, VerificationDecision, WriteBatch,
};
use crate::status::{self, Trigger};

/// An admin's decision on a pending proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: VerificationDecision,
    pub comment: Option<String>,
    /// 1..=5, approval only
    pub rating: Option<u8>,
}

impl Verdict {
    pub fn approve(rating: u8) -> Self {
        Self {
            decision: VerificationDecision::Approved,
            comment: None,
            rating: Some(rating),
        }
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self {
            decision: VerificationDecision::Rejected,
            comment: Some(comment.into()),
            rating: None,
        }
    }

    pub fn reassign(comment: impl Into<String>) -> Self {
        Self {
            decision: VerificationDecision::Reassign,
            comment: Some(comment.into()),
            rating: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Approval needs a 1..=5 rating; rejection and reassignment need a
    /// non-empty comment and take no rating
    pub fn validate(&self) -> LifecycleResult<()> {
        match self.decision {
            VerificationDecision::Approved => match self.rating {
                Some(1..=5) => Ok(()),
                Some(r) => Err(LifecycleError::invalid_input(format!(
                    "rating must be between 1 and 5, got {}",
                    r
                ))),
                None => Err(LifecycleError::invalid_input("approval requires a rating")),
            },
            VerificationDecision::Rejected | VerificationDecision::Reassign => {
                if self.rating.is_some() {
                    return Err(LifecycleError::invalid_input(
                        "rating is only given on approval",
                    ));
                }
                match self.comment.as_deref().map(str::trim) {
                    Some(c) if !c.is_empty() => Ok(()),
                    _ => Err(LifecycleError::invalid_input(format!(
                        "a {} decision requires a comment",
                        self.decision
                    ))),
                }
            }
        }
    }

    fn target(&self) -> (ReportStatus, Trigger) {
        match self.decision {
            VerificationDecision::Approved => (ReportStatus::Closed, Trigger::ProofApproved),
            VerificationDecision::Rejected => (ReportStatus::Reopened, Trigger::ProofRejected),
            VerificationDecision::Reassign => (ReportStatus::Reopened, Trigger::Reassignment),
        }
    }
}

impl Engine {
    /// Submit evidence of completed work for admin review
    pub fn submit_proof(
        &self,
        report_id: &str,
        worker: &Actor,
        evidence: Vec<String>,
        notes: Option<String>,
    ) -> LifecycleResult<ResolutionProof> {
        self.locks().with_report(report_id, || {
            let mut report = self.get_report(report_id)?;
            if report.is_closed() {
                return Err(LifecycleError::ReportLocked {
                    report_id: report_id.to_string(),
                });
            }
            let assignment = match self.store().active_assignment(report_id)? {
                Some(a) if a.worker_id == worker.id => a,
                _ => {
                    return Err(LifecycleError::NotAssignedWorker {
                        report_id: report_id.to_string(),
                        actor_id: worker.id.clone(),
                    })
                }
            };
            let from = report.status;
            status::validate(
                report_id,
                from,
                ReportStatus::AwaitingVerification,
                Trigger::ProofSubmitted,
            )?;

            let evidence: Vec<String> = evidence
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            if evidence.is_empty() {
                return Err(LifecycleError::invalid_input(
                    "a proof needs at least one evidence reference",
                ));
            }

            let now = self.now();
            let proof = ResolutionProof {
                id: new_id(),
                report_id: report_id.to_string(),
                worker_id: worker.id.clone(),
                evidence,
                notes: notes.filter(|n| !n.trim().is_empty()),
                cycle: report.proof_cycle,
                outcome: ProofOutcome::Pending,
                decision: None,
                verified_by: None,
                verified_at: None,
                review_comment: None,
                rating: None,
                submitted_at: now,
            };

            report.status = ReportStatus::AwaitingVerification;
            report.updated_at = now;

            let mut details = status::status_details(from, report.status);
            details["proof_id"] = json!(proof.id);
            details["evidence_count"] = json!(proof.evidence.len());
            details["cycle"] = json!(proof.cycle);

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
                .put(Record::Proof(proof.clone()))
                .put(Record::Report(report.clone()))
                .append_log(ActivityLogEntry::new(
                    report.id.clone(),
                    Some(worker.id.clone()),
                    ActionType::ProofSubmitted,
                    details,
                    now,
                ));
            self.commit(batch, Some(worker), Some(ReportStatus::AwaitingVerification))?;

            info!(
                report_id,
                proof_id = %proof.id,
                worker_id = %worker.id,
                cycle = proof.cycle,
                "Proof submitted"
            );
            self.publish(vec![
                LifecycleEvent::ProofSubmitted {
                    report_id: report.id.clone(),
                    proof_id: proof.id.clone(),
                    worker_id: worker.id.clone(),
                    timestamp: now,
                },
                LifecycleEvent::StatusChanged {
                    report_id: report.id.clone(),
                    from,
                    to: report.status,
                    timestamp: now,
                },
            ]);
            Ok(proof)
        })
    }

    /// Decide on a pending proof.
    ///
    /// - approved: report closes, the assignment ends, reporter and worker
    ///   are notified
    /// - rejected: report reopens, the same worker keeps the assignment
    /// - reassign: report reopens without an assignee, the displaced worker
    ///   is notified
    ///
    /// A proof that is no longer pending fails with `AlreadyVerified` and
    /// writes nothing.
    pub fn verify(
        &self,
        report_id: &str,
        proof_id: &str,
        admin: &Actor,
        verdict: Verdict,
    ) -> LifecycleResult<ResolutionProof> {
        self.require_admin(admin, "verify proofs")?;

        self.locks().with_report(report_id, || {
            let mut proof = self
                .store()
                .get_proof(proof_id)?
                .filter(|p| p.report_id == report_id)
                .ok_or_else(|| LifecycleError::not_found("proof", proof_id))?;
            if proof.outcome != ProofOutcome::Pending {
                return Err(LifecycleError::AlreadyVerified {
                    proof_id: proof_id.to_string(),
                });
            }

            let mut report = self.get_report(report_id)?;
            let from = report.status;
            let (to, trigger) = verdict.target();
            status::validate(report_id, from, to, trigger)?;
            verdict.validate()?;

            let now = self.now();
            let comment = verdict
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from);

            proof.outcome = verdict.decision.outcome();
            proof.decision = Some(verdict.decision);
            proof.verified_by = Some(admin.id.clone());
            proof.verified_at = Some(now);
            proof.review_comment = comment.clone();
            proof.rating = verdict.rating;

            report.status = to;
            report.updated_at = now;
            match verdict.decision {
                VerificationDecision::Approved => report.resolved_at = Some(now),
                VerificationDecision::Rejected | VerificationDecision::Reassign => {
                    report.proof_cycle += 1
                }
            }

            let mut batch = WriteBatch::new();
            batch
                .expect(Precondition::ProofOutcome {
                    proof_id: proof.id.clone(),
                    expected: ProofOutcome::Pending,
                })
                .expect(Precondition::ReportStatus {
                    report_id: report.id.clone(),
                    expected: from,
                });

            // Approval and reassignment end the worker's assignment
            if verdict.decision != VerificationDecision::Rejected {
                if let Some(mut active) = self.store().active_assignment(report_id)? {
                    batch.expect(Precondition::ActiveAssignment {
                        report_id: report.id.clone(),
                        assignment_id: active.id.clone(),
                    });
                    let reason = match verdict.decision {
                        VerificationDecision::Approved => "closed",
                        _ => "reassign requested at verification",
                    };
                    active.deactivate(reason, now);
                    if let Some(worker) = self.release_worker(&active)? {
                        batch.put(Record::Worker(worker));
                    }
                    batch.put(Record::Assignment(active));
                }
            }

            let mut details = status::status_details(from, to);
            details["proof_id"] = json!(proof.id);
            details["worker_id"] = json!(proof.worker_id);
            details["decision"] = json!(verdict.decision);
            details["comment"] = json!(comment);
            details["rating"] = json!(verdict.rating);
            details["cycle"] = json!(proof.cycle);

            batch
                .put(Record::Proof(proof.clone()))
                .put(Record::Report(report.clone()))
                .append_log(ActivityLogEntry::new(
                    report.id.clone(),
                    Some(admin.id.clone()),
                    ActionType::Verification,
                    details,
                    now,
                ));
            self.commit(batch, Some(admin), Some(to))?;

            info!(
                report_id,
                proof_id,
                decision = %verdict.decision,
                %from,
                %to,
                admin = %admin.id,
                "Proof verified"
            );
            self.publish(vec![
                LifecycleEvent::ProofVerified {
                    report_id: report.id.clone(),
                    proof_id: proof.id.clone(),
                    decision: verdict.decision,
                    timestamp: now,
                },
                LifecycleEvent::StatusChanged {
                    report_id: report.id.clone(),
                    from,
                    to,
                    timestamp: now,
                },
            ]);

            let worker_notice = match verdict.decision {
                VerificationDecision::Approved => Notification::for_report(
                    proof.worker_id.clone(),
                    &report.id,
                    NotificationKind::ProofApproved,
                    "Work approved",
                    format!("Your work on \"{}\" was approved", report.title),
                    now,
                ),
                VerificationDecision::Rejected => Notification::for_report(
                    proof.worker_id.clone(),
                    &report.id,
                    NotificationKind::ProofRejected,
                    "Work needs another pass",
                    comment.clone().unwrap_or_default(),
                    now,
                ),
                VerificationDecision::Reassign => Notification::for_report(
                    proof.worker_id.clone(),
                    &report.id,
                    NotificationKind::WorkerRemoved,
                    "Removed from report",
                    comment.clone().unwrap_or_default(),
                    now,
                ),
            };
            let mut notifications = vec![worker_notice];
            if verdict.decision == VerificationDecision::Approved {
                notifications.push(Notification::for_report(
                    report.reporter_id.clone(),
                    &report.id,
                    NotificationKind::ReportResolved,
                    "Report resolved",
                    format!("\"{}\" has been resolved", report.title),
                    now,
                ));
            }
            self.notify(notifications);

            Ok(proof)
        })
    }

    /// Every proof submitted for a report, oldest first
    pub fn report_proofs(&self, report_id: &str) -> LifecycleResult<Vec<ResolutionProof>> {
        self.get_report(report_id)?;
        Ok(self.store().report_proofs(report_id)?)
    }
}
