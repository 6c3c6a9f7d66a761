//! Civic issue report lifecycle and escalation engine
//!
//! Tracks civic-infrastructure issues from a citizen's report through field
//! work and admin verification.
//!
//! # Components
//!
//! - [`status`]: the report state machine and its trigger-tagged edges
//! - [`assignment`]: binding workers to reports, reassignment, workload
//! - [`escalation`]: SLA sweeps, manual flags and escalation resolution
//! - [`verifier`]: resolution proof submission and the admin decision
//! - [`channel`]: role-scoped message channels per report
//! - [`activity`]: the append-only audit trail
//! - [`sla`]: deadline arithmetic and the engine clock
//!
//! All operations are methods on [`Engine`], which takes the acting
//! [`Actor`] explicitly and commits each change together with its audit
//! entry in one atomic [`WriteBatch`](state::WriteBatch).
//!
//! # Usage
//!
//! ```no_run
//! use civic_lifecycle::{Actor, Engine, NewReport, Priority, Location, Verdict, ReportStatus};
//!
//! # fn main() -> Result<(), civic_lifecycle::LifecycleError> {
//! let engine = Engine::in_memory();
//! let admin = Actor::admin("admin-1");
//! let worker = Actor::worker("w-17");
//! engine.register_worker(&admin, "w-17", "Road crew 17")?;
//!
//! let report = engine.create_report(
//!     &Actor::citizen("c-42"),
//!     NewReport {
//!         title: "Pothole on Elm St".into(),
//!         description: "Deep enough to damage tyres".into(),
//!         category: "roads".into(),
//!         priority: Priority::High,
//!         risk_score: 72.0,
//!         location: Location::default(),
//!     },
//! )?;
//!
//! engine.assign(&report.id, "w-17", &admin, None)?;
//! engine.transition(&report.id, ReportStatus::InProgress, &worker)?;
//! let proof = engine.submit_proof(&report.id, &worker, vec!["evidence/elm.jpg".into()], None)?;
//! engine.verify(&report.id, &proof.id, &admin, Verdict::approve(5))?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod activity;
pub mod assignment;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod events;
pub mod locks;
pub mod notify;
pub mod sla;
pub mod state;
pub mod status;
pub mod verifier;

pub use activity::StatusStep;
pub use assignment::WorkerLoad;
pub use channel::Participants;
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::{LifecycleError, LifecycleResult};
pub use escalation::SweepReport;
pub use events::{EventBus, EventBusExt, EventFilter, FilteredReceiver, LifecycleEvent};
pub use notify::{BusNotifier, LogNotifier, Notification, NotificationKind, Notifier, NotifyError};
pub use sla::{Clock, ManualClock, SlaPolicy, SlaStatus, SystemClock};
pub use state::{
    ActionType, Actor, ActivityLogEntry, Assignment, Channel, Escalation, EscalationSource,
    Location, MemoryStore, Message, NewReport, Priority, ProofOutcome, Report, ReportFilter,
    ReportStatus, ResolutionProof, Role, Severity, Store, VerificationDecision,
    WorkerAvailability, WorkerProfile,
};
pub use status::Trigger;
pub use verifier::Verdict;
