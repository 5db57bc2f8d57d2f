//! Run Orchestration Domain Types for Flowrun
//!
//! A *run* is one execution of a decomposed workflow definition. These types
//! describe the run aggregate, the lifecycle graph it moves through, and the
//! credentials and reports exchanged with parties outside the orchestrator.
//!
//! # Key Concepts
//!
//! - **WorkflowRun**: the aggregate root. Only the holder of a run's lock
//!   mutates it.
//! - **RunStatus**: `CREATED → RUNNING ⇄ SUSPENDED → {COMPLETED, FAILED,
//!   CANCELED}`; terminal states never move again.
//! - **NodeExecutionResult**: an executor's report for one node attempt.
//! - **ExecutionToken / CallbackRegistration**: credentials gating who may
//!   report results or inject signals.
//! - **ExecutionEvent**: an entry in a run's append-only history.

#![deny(unsafe_code)]

mod clock;
mod definition;
mod errors;
mod event;
mod ids;
mod node;
mod query;
mod run;
mod signal;
mod status;
mod token;
mod validation;

pub use clock::*;
pub use definition::*;
pub use errors::*;
pub use event::*;
pub use ids::*;
pub use node::*;
pub use query::*;
pub use run::*;
pub use signal::*;
pub use status::*;
pub use token::*;
pub use validation::*;
