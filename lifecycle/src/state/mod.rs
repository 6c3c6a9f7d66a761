//! Persistent state for the report lifecycle
//!
//! This module provides the record types and the storage abstraction the
//! engine mutates through:
//! - Reports, assignments, escalations and resolution proofs
//! - Channel messages and the append-only activity log
//! - Worker profiles used for cooldown and workload display
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local tables behind a single `RwLock`, the
//!   default backend and the one used by tests.
//! - `RocksStore` (feature `heavy-state`): RocksDB with one column family per
//!   collection, see [`schema`].
//!
//! Both apply a [`WriteBatch`] atomically and evaluate its
//! [`Precondition`]s inside the same critical section.

pub mod schema;
pub mod store;
pub mod types;

#[cfg(feature = "heavy-state")]
pub mod rocks;

// Re-export core types
#[cfg(feature = "heavy-state")]
pub use rocks::RocksStore;
pub use store::{
    MemoryStore, Precondition, Record, RecordView, SharedStore, Store, StoreError, StoreResult,
    WriteBatch,
};
pub use types::{
    new_id, ActionType, Actor, ActorId, ActivityLogEntry, Assignment, AssignmentId, Channel,
    Escalation, EscalationId, EscalationSource, Location, Message, NewReport, Priority, ProofId,
    ProofOutcome, Report, ReportFilter, ReportId, ReportStatus, ResolutionProof, Role, Severity,
    VerificationDecision, WorkerAvailability, WorkerProfile,
};
