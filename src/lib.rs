//! liveshift — online, zero-downtime data migration between two relational
//! stores.
//!
//! The engine has four cooperating parts:
//!
//! - [`pool::DoubleWritePool`] — a write-routing proxy presenting one
//!   pool-shaped interface over a source and a destination store, dispatching
//!   every statement and transaction by the operator-controlled
//!   [`pattern::Pattern`].
//! - [`validator::Validator`] — two concurrent sweeps (base→target and
//!   target→base) that detect divergence between the stores and publish
//!   [`events::InconsistencyEvent`]s; [`validator::ChangeFeedValidator`]
//!   re-checks single rows off a change feed.
//! - [`events::FixerConsumer`] / [`fixer::Fixer`] — consume those events and
//!   repair each divergence by copying the authoritative row or deleting the
//!   orphan, idempotently.
//! - [`scheduler::Scheduler`] — the control plane sequencing pattern changes
//!   and validation runs, single-flight per run kind.
//!
//! An operator walks `src_only` → `src_first` → `dst_first` → `dst_only`,
//! draining divergence with validation/repair between transitions. No state
//! is persisted: a restart comes back in `src_only` and never silently
//! resumes dual-write.

pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod fixer;
pub mod pattern;
pub mod pool;
pub mod scheduler;
pub mod shutdown;
pub mod sqlstore;
pub mod store;
pub mod testkit;
pub mod validator;

#[cfg(feature = "database")]
pub mod postgres;
#[cfg(feature = "server")]
pub mod server;

pub use config::EngineConfig;
pub use entity::Entity;
pub use error::{BusError, SchedulerError, StoreError};
pub use events::{
    Direction, EventProducer, FixerConsumer, InconsistencyEvent, InconsistencyKind,
};
pub use fixer::Fixer;
pub use pattern::{Pattern, SharedPattern};
pub use pool::DoubleWritePool;
pub use scheduler::Scheduler;
pub use shutdown::{cancel_pair, CancelHandle, CancelSignal};
pub use sqlstore::SqlRecordStore;
pub use store::{ConnPool, ExecOutcome, RecordStore, Tx};
pub use validator::{ChangeFeedValidator, Validator};
