//! Callback registrations for external signal senders

use crate::token_service::random_token;
use chrono::Duration;
use flowrun_storage::CallbackStore;
use flowrun_types::{
    CallbackConfig, CallbackRegistration, Clock, NodeId, WorkflowError, WorkflowResult,
    WorkflowRunId,
};
use std::sync::Arc;

/// Mints and checks callback tokens
#[derive(Clone)]
pub struct CallbackService {
    store: Arc<dyn CallbackStore>,
    clock: Arc<dyn Clock>,
}

impl CallbackService {
    pub fn new(store: Arc<dyn CallbackStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Authorize one external sender to signal `run_id`/`node_id`.
    pub async fn register(
        &self,
        run_id: &WorkflowRunId,
        node_id: &NodeId,
        config: CallbackConfig,
    ) -> WorkflowResult<CallbackRegistration> {
        if config.callback_url.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "callback url must not be empty".to_string(),
            ));
        }

        let registered_at = self.clock.now();
        let expires_at = match config.ttl_secs {
            Some(secs) => {
                let expires_at = i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| registered_at.checked_add_signed(ttl))
                    .ok_or_else(|| {
                        WorkflowError::Validation(format!("callback ttl {secs}s out of range"))
                    })?;
                Some(expires_at)
            }
            None => None,
        };

        let registration = CallbackRegistration {
            token: random_token(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            callback_url: config.callback_url,
            registered_at,
            expires_at,
        };
        self.store.save_callback(&registration).await?;

        tracing::info!(
            run_id = %run_id,
            node_id = %node_id,
            callback_url = %registration.callback_url,
            "Callback registered"
        );
        Ok(registration)
    }

    /// Whether the token is registered, not invalidated and not expired
    pub async fn verify(&self, token: &str) -> WorkflowResult<bool> {
        Ok(self.active_registration(token).await?.is_some())
    }

    /// The live registration behind `token`, only if it belongs to `run_id`
    pub async fn verify_for_run(
        &self,
        token: &str,
        run_id: &WorkflowRunId,
    ) -> WorkflowResult<Option<CallbackRegistration>> {
        Ok(self
            .active_registration(token)
            .await?
            .filter(|registration| &registration.run_id == run_id))
    }

    pub async fn invalidate(&self, token: &str) -> WorkflowResult<bool> {
        let invalidated = self.store
            .invalidate_callback(token, self.clock.now())
            .await?;
        if invalidated {
            tracing::debug!("Callback token invalidated");
        }
        Ok(invalidated)
    }

    async fn active_registration(&self, token: &str) -> WorkflowResult<Option<CallbackRegistration>> {
        if token.trim().is_empty() {
            return Ok(None);
        }
        let now = self.clock.now();
        Ok(self
            .store
            .find_callback(token)
            .await?
            .filter(|registration| !registration.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use flowrun_storage::{InMemoryRunStorage, StorageResult};
    use flowrun_types::ManualClock;
    use std::sync::Mutex;

    /// Remembers the time each invalidation was stamped with
    #[derive(Default)]
    struct StampingStore {
        inner: InMemoryRunStorage,
        invalidated_at: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl CallbackStore for StampingStore {
        async fn save_callback(&self, registration: &CallbackRegistration) -> StorageResult<()> {
            self.inner.save_callback(registration).await
        }

        async fn find_callback(&self, token: &str) -> StorageResult<Option<CallbackRegistration>> {
            self.inner.find_callback(token).await
        }

        async fn invalidate_callback(&self, token: &str, now: DateTime<Utc>) -> StorageResult<bool> {
            self.invalidated_at.lock().unwrap().push(now);
            self.inner.invalidate_callback(token, now).await
        }
    }

    fn service(clock: Arc<ManualClock>) -> CallbackService {
        CallbackService::new(Arc::new(InMemoryRunStorage::new()), clock)
    }

    #[tokio::test]
    async fn registered_token_verifies_and_random_token_does_not() {
        let callbacks = service(Arc::new(ManualClock::new(Utc::now())));
        let registration = callbacks
            .register(
                &WorkflowRunId::new("r1"),
                &NodeId::new("n1"),
                CallbackConfig::new("https://example.test/hook"),
            )
            .await
            .unwrap();

        assert!(callbacks.verify(&registration.token).await.unwrap());
        assert!(!callbacks.verify(&random_token()).await.unwrap());
        assert!(!callbacks.verify("").await.unwrap());
    }

    #[tokio::test]
    async fn token_is_bound_to_its_run() {
        let callbacks = service(Arc::new(ManualClock::new(Utc::now())));
        let registration = callbacks
            .register(
                &WorkflowRunId::new("r1"),
                &NodeId::new("n1"),
                CallbackConfig::new("https://example.test/hook"),
            )
            .await
            .unwrap();

        assert!(callbacks
            .verify_for_run(&registration.token, &WorkflowRunId::new("r1"))
            .await
            .unwrap()
            .is_some());
        assert!(callbacks
            .verify_for_run(&registration.token, &WorkflowRunId::new("r2"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ttl_and_invalidation_end_validity() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let callbacks = service(clock.clone());
        let expiring = callbacks
            .register(
                &WorkflowRunId::new("r1"),
                &NodeId::new("n1"),
                CallbackConfig::new("https://example.test/hook").with_ttl_secs(60),
            )
            .await
            .unwrap();
        let revocable = callbacks
            .register(
                &WorkflowRunId::new("r1"),
                &NodeId::new("n2"),
                CallbackConfig::new("https://example.test/other"),
            )
            .await
            .unwrap();

        clock.advance(Duration::seconds(60));
        assert!(!callbacks.verify(&expiring.token).await.unwrap());
        assert!(callbacks.verify(&revocable.token).await.unwrap());

        assert!(callbacks.invalidate(&revocable.token).await.unwrap());
        assert!(!callbacks.verify(&revocable.token).await.unwrap());
    }

    #[tokio::test]
    async fn blank_callback_url_is_rejected() {
        let callbacks = service(Arc::new(ManualClock::new(Utc::now())));
        let err = callbacks
            .register(&WorkflowRunId::new("r1"), &NodeId::new("n1"), CallbackConfig::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn ttl_beyond_the_calendar_is_rejected() {
        let callbacks = service(Arc::new(ManualClock::new(Utc::now())));
        for ttl_secs in [10_000_000_000_000, 10_000_000_000_000_000, u64::MAX] {
            let err = callbacks
                .register(
                    &WorkflowRunId::new("r1"),
                    &NodeId::new("n1"),
                    CallbackConfig::new("https://example.test/hook").with_ttl_secs(ttl_secs),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, WorkflowError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn invalidation_is_stamped_with_the_service_clock() {
        let started = Utc::now() - Duration::days(3);
        let clock = Arc::new(ManualClock::new(started));
        let store = Arc::new(StampingStore::default());
        let callbacks = CallbackService::new(store.clone(), clock.clone());
        let registration = callbacks
            .register(
                &WorkflowRunId::new("r1"),
                &NodeId::new("n1"),
                CallbackConfig::new("https://example.test/hook"),
            )
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        assert!(callbacks.invalidate(&registration.token).await.unwrap());
        assert_eq!(
            *store.invalidated_at.lock().unwrap(),
            vec![started + Duration::minutes(5)]
        );
    }
}
