use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A signal admitted into a run. Only built by trusted code paths.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        name: impl Into<String>,
        target_node_id: NodeId,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            target_node_id,
            payload,
            timestamp,
        }
    }

    /// Admit an external signal, stamping it with the receive time.
    pub fn from_external(external: ExternalSignal, received_at: DateTime<Utc>) -> Self {
        Self {
            name: external.signal_type,
            target_node_id: external.target_node_id,
            payload: external.payload,
            timestamp: received_at,
        }
    }
}

/// A signal as submitted by an untrusted external sender
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalSignal {
    pub signal_type: String,
    pub target_node_id: NodeId,
    #[serde(default)]
    pub payload: Value,
}

impl ExternalSignal {
    pub fn new(signal_type: impl Into<String>, target_node_id: NodeId, payload: Value) -> Self {
        Self {
            signal_type: signal_type.into(),
            target_node_id,
            payload,
        }
    }
}
