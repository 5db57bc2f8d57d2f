//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settings for one orchestrator instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Identity recorded as the owner of run leases
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Validity window of execution tokens, in seconds
    #[serde(default = "default_token_lease_secs")]
    pub token_lease_secs: u64,

    /// Per-run lease settings
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            token_lease_secs: default_token_lease_secs(),
            lock: LockConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_token_lease_secs(mut self, secs: u64) -> Self {
        self.token_lease_secs = secs;
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn token_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.token_lease_secs).unwrap_or(i64::MAX / 1000))
    }
}

/// Per-run lease settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a lease stays valid if its holder never releases it
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Upper bound on waiting for a contended lease
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Pause between acquisition attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: default_lease_ttl_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lease_ttl_ms).unwrap_or(i64::MAX / 1000))
    }

    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

// Default value helpers
fn default_instance_id() -> String {
    format!("flowrun-{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn default_token_lease_secs() -> u64 {
    300
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

fn default_retry_interval_ms() -> u64 {
    25
}
