//! Flowrun storage abstractions.
//!
//! Every orchestrator instance shares one storage backend. It holds:
//! - run aggregates, versioned for optimistic checks
//! - per-run leases that serialize mutations across instances
//! - append-only execution history plus the node-result idempotency ledger
//! - issued execution tokens and callback registrations
//!
//! The in-memory backend is for tests and single-process use. Multi-instance
//! deployments use the PostgreSQL backend (`postgres` feature).

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryRunStorage;
pub use model::RunLease;
pub use traits::{
    CallbackStore, ExecutionHistoryStore, ExecutionTokenStore, OrchestratorStorage, RunLockStore,
    WorkflowRunStore,
};
