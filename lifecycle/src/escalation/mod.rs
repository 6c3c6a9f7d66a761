//! Escalation engine
//!
//! Escalations come from two sources:
//!
//! - **Automatic**: [`Engine::sweep_sla_breaches`] flags open reports whose
//!   SLA deadline (`created_at + sla_hours(priority)`) has strictly passed.
//! - **Manual**: [`Engine::escalate`], by an admin, the reporter, or a worker
//!   who has been assigned to the report.
//!
//! A report carries at most one open escalation. Resolution clears the
//! report's `escalated` flag only when nothing else remains open, and may
//! close the report or hand it to another worker in the same write.
//!
//! [`Engine::sweep_sla_breaches`]: crate::Engine::sweep_sla_breaches
//! [`Engine::escalate`]: crate::Engine::escalate

pub mod engine;
pub mod sweep;

pub use sweep::SweepReport;
