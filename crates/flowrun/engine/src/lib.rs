//! Flowrun Orchestrator Runtime
//!
//! Owns the authoritative lifecycle state of workflow runs. It accepts
//! asynchronous completion reports from an external execution plane and
//! exposes tenant-scoped control operations that are safe under concurrent
//! and duplicate invocation from many orchestrator instances.
//!
//! # Key Principle
//!
//! **The orchestrator tracks runs, it NEVER executes nodes.**
//!
//! Executors do the work and report back; the orchestrator decides whether a
//! report is authentic, whether it was already applied, and what it means for
//! the run.
//!
//! # Architecture
//!
//! The [`WorkflowRunManager`] composes specialized components:
//!
//! - [`StateTransitionValidator`]: pure checks over the run state graph
//! - [`ExecutionTokenService`]: per-attempt executor credentials and signatures
//! - [`CallbackService`]: tokens for external signal senders
//! - [`ExecutionHistoryRepository`]: append-only history and the idempotency ledger
//! - [`WorkflowRunRepository`]: persistence and the per-run lease (`with_lock`)
//! - [`CompensationCoordinator`]: saga rollback, invoked when a run fails
//! - [`WorkflowDefinitionRegistry`]: source of the definitions runs are created from
//!
//! # Example
//!
//! ```rust
//! use flowrun_engine::{InMemoryDefinitionRegistry, WorkflowRunManager};
//! use flowrun_storage::InMemoryRunStorage;
//! use flowrun_types::*;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let registry = Arc::new(InMemoryDefinitionRegistry::new());
//! let tenant = TenantId::new("acme");
//! let def_id = registry
//!     .register(WorkflowDefinition::new("etl", tenant.clone()).with_node("extract"))
//!     .unwrap();
//!
//! let manager = WorkflowRunManager::builder(Arc::new(InMemoryRunStorage::new()), registry).build();
//! let run = manager.create_run(&def_id, &tenant, BTreeMap::new()).await.unwrap();
//! let run = manager.start_run(&run.id, &tenant).await.unwrap();
//! assert_eq!(run.status, RunStatus::Running);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]

pub mod callback_service;
pub mod compensation;
pub mod config;
pub mod definition_registry;
pub mod history;
pub mod manager;
pub mod repository;
pub mod signal_router;
pub mod token_service;
pub mod transition_validator;

// Re-export main types
pub use callback_service::CallbackService;
pub use compensation::{CompensationCoordinator, CompensationError, NoopCompensationCoordinator};
pub use config::{LockConfig, OrchestratorConfig};
pub use definition_registry::{InMemoryDefinitionRegistry, WorkflowDefinitionRegistry};
pub use history::ExecutionHistoryRepository;
pub use manager::{WorkflowRunManager, WorkflowRunManagerBuilder};
pub use repository::WorkflowRunRepository;
pub use signal_router::SignalRouter;
pub use token_service::ExecutionTokenService;
pub use transition_validator::StateTransitionValidator;
