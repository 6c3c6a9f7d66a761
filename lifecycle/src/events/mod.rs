//! Realtime event feed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │    Engine    │────▶│  Event Bus   │────▶│ FilteredReceiver │
//! │ (post-commit)│     │  (broadcast) │     │ (report/channel) │
//! └──────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! Events are published only after the store commit that produced them, so a
//! subscriber never observes a change the store does not hold. There is no
//! replay: a lagging or reconnecting client re-fetches from the store.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::LifecycleEvent;
