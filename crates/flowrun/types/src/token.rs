//! Credentials handed to parties outside the orchestrator
//!
//! - [`ExecutionToken`]: lets one executor report one node attempt's result.
//! - [`CallbackRegistration`]: lets one external sender inject signals into
//!   one run/node.

use crate::{NodeId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short-lived credential for reporting the result of one node attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionToken {
    /// Opaque random token (hex)
    pub token: String,
    pub run_id: WorkflowRunId,
    pub node_id: NodeId,
    pub attempt: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExecutionToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this token was issued for the given node attempt
    pub fn covers(&self, run_id: &WorkflowRunId, node_id: &NodeId, attempt: u32) -> bool {
        &self.run_id == run_id && &self.node_id == node_id && self.attempt == attempt
    }
}

/// Caller-supplied options for a callback registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Where the external party will be notified (opaque to the core)
    pub callback_url: String,
    /// Optional validity window in seconds; `None` means until invalidated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl CallbackConfig {
    pub fn new(callback_url: impl Into<String>) -> Self {
        Self {
            callback_url: callback_url.into(),
            ttl_secs: None,
        }
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

/// A token authorizing an external sender to signal one run/node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRegistration {
    pub token: String,
    pub run_id: WorkflowRunId,
    pub node_id: NodeId,
    pub callback_url: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CallbackRegistration {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}
