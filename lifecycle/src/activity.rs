//! Audit trail queries
//!
//! Entries are written by the operation they describe, inside the same
//! commit (see [`crate::engine`]). This module only reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::LifecycleResult;
use crate::state::{ActionType, ActivityLogEntry, ActorId, ReportStatus};

/// One status change recovered from the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStep {
    pub from: ReportStatus,
    pub to: ReportStatus,
    pub action: ActionType,
    pub actor_id: Option<ActorId>,
    pub at: DateTime<Utc>,
}

impl StatusStep {
    /// Read the `from`/`to` pair an entry carries, if it changed status
    pub fn from_entry(entry: &ActivityLogEntry) -> Option<Self> {
        let from: ReportStatus = serde_json::from_value(entry.details.get("from")?.clone()).ok()?;
        let to: ReportStatus = serde_json::from_value(entry.details.get("to")?.clone()).ok()?;
        (from != to).then(|| Self {
            from,
            to,
            action: entry.action,
            actor_id: entry.actor_id.clone(),
            at: entry.created_at,
        })
    }
}

impl Engine {
    /// Every audit entry of a report, oldest first
    pub fn timeline(&self, report_id: &str) -> LifecycleResult<Vec<ActivityLogEntry>> {
        self.get_report(report_id)?;
        Ok(self.store().report_activity(report_id)?)
    }

    /// Audit entries of one action type
    pub fn timeline_of(
        &self,
        report_id: &str,
        action: ActionType,
    ) -> LifecycleResult<Vec<ActivityLogEntry>> {
        Ok(self
            .timeline(report_id)?
            .into_iter()
            .filter(|e| e.action == action)
            .collect())
    }

    /// Entries produced by one causal event
    pub fn causal_chain(
        &self,
        report_id: &str,
        causation_id: &str,
    ) -> LifecycleResult<Vec<ActivityLogEntry>> {
        Ok(self
            .timeline(report_id)?
            .into_iter()
            .filter(|e| e.causation_id.as_deref() == Some(causation_id))
            .collect())
    }

    /// The report's status path, reconstructed from the audit trail
    pub fn status_history(&self, report_id: &str) -> LifecycleResult<Vec<StatusStep>> {
        Ok(self
            .timeline(report_id)?
            .iter()
            .filter_map(StatusStep::from_entry)
            .collect())
    }
}
