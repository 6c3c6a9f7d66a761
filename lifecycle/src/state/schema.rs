//! Column family definitions for the RocksDB store
//!
//! Each column family holds one record collection. Keys are prefixed by the
//! owning report so per-report scans are a single prefix iteration.

/// Column family for reports
pub const CF_REPORTS: &str = "reports";

/// Column family for assignments
pub const CF_ASSIGNMENTS: &str = "assignments";

/// Column family for escalations
pub const CF_ESCALATIONS: &str = "escalations";

/// Column family for resolution proofs
pub const CF_PROOFS: &str = "proofs";

/// Column family for channel messages
pub const CF_MESSAGES: &str = "messages";

/// Column family for the activity log
pub const CF_ACTIVITY: &str = "activity";

/// Column family for worker profiles
pub const CF_WORKERS: &str = "workers";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_REPORTS,
    CF_ASSIGNMENTS,
    CF_ESCALATIONS,
    CF_PROOFS,
    CF_MESSAGES,
    CF_ACTIVITY,
    CF_WORKERS,
];

/// Key prefixes for compound keys
pub mod keys {
    use chrono::{DateTime, Utc};

    fn ordered_nanos(at: &DateTime<Utc>) -> u64 {
        at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64
    }

    /// Create a report key
    pub fn report(report_id: &str) -> String {
        format!("report:{}", report_id)
    }

    /// Create an assignment key
    pub fn assignment(report_id: &str, assignment_id: &str) -> String {
        format!("asg:{}:{}", report_id, assignment_id)
    }

    /// Prefix covering every assignment of a report
    pub fn assignment_prefix(report_id: &str) -> String {
        format!("asg:{}:", report_id)
    }

    /// Create an escalation key
    pub fn escalation(report_id: &str, escalation_id: &str) -> String {
        format!("esc:{}:{}", report_id, escalation_id)
    }

    /// Prefix covering every escalation of a report
    pub fn escalation_prefix(report_id: &str) -> String {
        format!("esc:{}:", report_id)
    }

    /// Create a proof key
    pub fn proof(report_id: &str, proof_id: &str) -> String {
        format!("proof:{}:{}", report_id, proof_id)
    }

    /// Prefix covering every proof of a report
    pub fn proof_prefix(report_id: &str) -> String {
        format!("proof:{}:", report_id)
    }

    /// Create a message key (timestamp-based for ordering within a channel)
    pub fn message(report_id: &str, channel: &str, at: &DateTime<Utc>, message_id: &str) -> String {
        format!(
            "msg:{}:{}:{:020}:{}",
            report_id,
            channel,
            ordered_nanos(at),
            message_id
        )
    }

    /// Prefix covering one channel of a report
    pub fn message_prefix(report_id: &str, channel: &str) -> String {
        format!("msg:{}:{}:", report_id, channel)
    }

    /// Create an activity key (timestamp-based for ordering)
    pub fn activity(report_id: &str, at: &DateTime<Utc>, entry_id: &str) -> String {
        format!("act:{}:{:020}:{}", report_id, ordered_nanos(at), entry_id)
    }

    /// Prefix covering the activity log of a report
    pub fn activity_prefix(report_id: &str) -> String {
        format!("act:{}:", report_id)
    }

    /// Create a worker key
    pub fn worker(worker_id: &str) -> String {
        format!("worker:{}", worker_id)
    }
}
