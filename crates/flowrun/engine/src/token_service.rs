//! Execution tokens: short-lived credentials for reporting node results
//!
//! The orchestrator issues one token per node attempt and hands it to the
//! executor. The executor never returns the token itself; it returns a keyed
//! BLAKE3 MAC of the result, keyed by a key derived from the token. Tokens live
//! in the shared token store so any orchestrator instance can verify them.

use chrono::{DateTime, Duration, Utc};
use flowrun_storage::ExecutionTokenStore;
use flowrun_types::{
    Clock, ErrorInfo, ExecutionToken, NodeExecutionResult, NodeId, WorkflowError, WorkflowResult,
    WorkflowRunId,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const SIGNING_CONTEXT: &str = "flowrun 2024 execution-token result signature v1";

/// Issues execution tokens and verifies executor signatures
#[derive(Clone)]
pub struct ExecutionTokenService {
    store: Arc<dyn ExecutionTokenStore>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl ExecutionTokenService {
    pub fn new(store: Arc<dyn ExecutionTokenStore>, clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self {
            store,
            clock,
            lease,
        }
    }

    /// Issue a fresh token for one node attempt
    pub async fn issue(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        attempt: u32,
    ) -> WorkflowResult<ExecutionToken> {
        let issued_at = self.clock.now();
        let token = ExecutionToken {
            token: random_token(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            attempt,
            issued_at,
            expires_at: issued_at + self.lease,
        };
        self.store.save_execution_token(&token).await?;

        tracing::debug!(
            run_id = %run_id,
            node_id = %node_id,
            attempt,
            expires_at = %token.expires_at,
            "Execution token issued"
        );
        Ok(token)
    }

    /// Compute the signature an executor attaches to `result`.
    pub fn sign(token: &ExecutionToken, result: &NodeExecutionResult) -> WorkflowResult<String> {
        Ok(result_mac(&token.token, result)?.to_hex().to_string())
    }

    /// Whether `signature` was produced with an unexpired token issued for
    /// exactly this result's run, node and attempt.
    pub async fn verify_signature(
        &self,
        result: &NodeExecutionResult,
        signature: &str,
    ) -> WorkflowResult<bool> {
        let signature = signature.trim();
        if signature.is_empty() {
            return Ok(false);
        }
        let presented = match blake3::Hash::from_hex(signature) {
            Ok(hash) => hash,
            Err(_) => return Ok(false),
        };

        let now = self.clock.now();
        let candidates = self
            .store
            .find_execution_tokens(&result.run_id, &result.node_id, result.attempt)
            .await?;

        for token in candidates.iter().filter(|t| !t.is_expired(now)) {
            // Hash equality is constant-time
            if result_mac(&token.token, result)? == presented {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Drop every outstanding token of a run. Failures are logged, not raised.
    pub async fn revoke_for_run(&self, run_id: &WorkflowRunId) -> u64 {
        match self.store.revoke_execution_tokens(run_id).await {
            Ok(revoked) => {
                if revoked > 0 {
                    tracing::debug!(run_id = %run_id, revoked, "Execution tokens revoked");
                }
                revoked
            }
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "Failed to revoke execution tokens");
                0
            }
        }
    }

    /// Remove tokens that expired before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> WorkflowResult<u64> {
        Ok(self.store.purge_expired_execution_tokens(now).await?)
    }
}

/// 256 random bits, hex encoded
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Serialize)]
struct SignedPayload<'a> {
    outputs: &'a BTreeMap<String, Value>,
    error: &'a Option<ErrorInfo>,
}

fn result_mac(token: &str, result: &NodeExecutionResult) -> WorkflowResult<blake3::Hash> {
    let key = blake3::derive_key(SIGNING_CONTEXT, token.as_bytes());

    // BTreeMap keys and serde_json maps are both ordered, so this encoding is canonical
    let payload = serde_json::to_vec(&SignedPayload {
        outputs: &result.outputs,
        error: &result.error,
    })
    .map_err(|e| WorkflowError::Validation(format!("unserializable node result: {e}")))?;
    let payload_digest = blake3::hash(&payload);

    let mut hasher = blake3::Hasher::new_keyed(&key);
    hasher.update(result.run_id.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(result.node_id.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(&result.attempt.to_be_bytes());
    hasher.update(result.status.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(payload_digest.as_bytes());
    Ok(hasher.finalize())
}
