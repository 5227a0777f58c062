//! Fixed-window sending quotas
//!
//! One active window per (user, resource). Window creation and the counter
//! increment are both atomic at the storage layer, so concurrent senders can
//! never push a window past its limit.

use crate::metrics::DeliverabilityMetrics;
use chrono::{DateTime, Utc};
use mailtrust_common::config::{QuotaConfig, QuotaLimit};
use mailtrust_common::types::{ResourceType, UserId};
use mailtrust_common::{Error, Result};
use mailtrust_storage::models::RateLimitWindow;
use mailtrust_storage::repository::{IncrementOutcome, RateLimitRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Windows that expire between lookup and increment are retried this often
const MAX_WINDOW_ROLLOVERS: usize = 3;

/// Upper bound on configured window length (roughly a century)
const MAX_WINDOW_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Whole seconds until the window closes, never less than one
pub fn retry_after(window: &RateLimitWindow, now: DateTime<Utc>) -> Duration {
    let millis = (window.window_end - now).num_milliseconds().max(0);
    let secs = (millis + 999) / 1000;
    Duration::from_secs(secs.max(1) as u64)
}

pub struct QuotaEnforcer {
    windows: Arc<dyn RateLimitRepository>,
    config: QuotaConfig,
    metrics: Option<DeliverabilityMetrics>,
}

impl QuotaEnforcer {
    pub fn new(windows: Arc<dyn RateLimitRepository>, config: QuotaConfig) -> Self {
        Self {
            windows,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DeliverabilityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self, resource: ResourceType) -> QuotaLimit {
        self.config.limit_for(resource.as_str())
    }

    fn window_length(policy: QuotaLimit) -> chrono::Duration {
        let secs = i64::try_from(policy.window_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.clamp(1, MAX_WINDOW_SECS))
    }

    /// The active window for now, created on first use
    pub async fn get_or_create(
        &self,
        user_id: UserId,
        resource: ResourceType,
    ) -> Result<RateLimitWindow> {
        let policy = self.policy(resource);
        self.windows
            .get_or_create_active(
                user_id,
                resource,
                policy.limit,
                Self::window_length(policy),
                Utc::now(),
            )
            .await
    }

    /// Count one use of `resource`, or refuse with a retry-after hint.
    /// A refused call leaves the counter untouched.
    pub async fn increment(
        &self,
        user_id: UserId,
        resource: ResourceType,
    ) -> Result<RateLimitWindow> {
        let policy = self.policy(resource);

        for _ in 0..MAX_WINDOW_ROLLOVERS {
            let now = Utc::now();
            let window = self
                .windows
                .get_or_create_active(
                    user_id,
                    resource,
                    policy.limit,
                    Self::window_length(policy),
                    now,
                )
                .await?;

            match self.windows.try_increment(window.id, now).await? {
                IncrementOutcome::Incremented(window) => {
                    debug!(
                        user_id = %user_id,
                        resource = %resource,
                        count = window.request_count,
                        limit = window.limit_value,
                        "Quota consumed"
                    );
                    return Ok(window);
                }
                IncrementOutcome::LimitReached(window) => {
                    let retry_after = retry_after(&window, now);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_quota_rejection(resource.as_str());
                    }
                    info!(
                        user_id = %user_id,
                        resource = %resource,
                        limit = window.limit_value,
                        retry_after_secs = retry_after.as_secs(),
                        "Quota exceeded"
                    );
                    return Err(Error::QuotaExceeded {
                        resource: resource.to_string(),
                        retry_after,
                    });
                }
                IncrementOutcome::Expired => {
                    debug!(
                        user_id = %user_id,
                        resource = %resource,
                        "Window expired mid-increment, rolling over"
                    );
                }
            }
        }

        warn!(
            user_id = %user_id,
            resource = %resource,
            "Quota window kept expiring during increment"
        );
        Err(Error::Conflict(format!(
            "Quota window for {} rolled over repeatedly",
            resource
        )))
    }

    /// Read-only variant of the increment check
    pub async fn is_exceeded(&self, user_id: UserId, resource: ResourceType) -> Result<bool> {
        Ok(match self.windows.get_active(user_id, resource, Utc::now()).await? {
            Some(window) => window.is_exhausted(),
            None => self.policy(resource).limit <= 0,
        })
    }

    /// Uses left in the current window (the full limit when none is active)
    pub async fn remaining(&self, user_id: UserId, resource: ResourceType) -> Result<i32> {
        Ok(match self.windows.get_active(user_id, resource, Utc::now()).await? {
            Some(window) => window.remaining(),
            None => self.policy(resource).limit.max(0),
        })
    }

    /// Purge windows that have ended
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.windows.delete_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Removed expired rate limit windows");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailtrust_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn enforcer(store: Arc<MemoryStore>, limit: i32, window_secs: u64) -> QuotaEnforcer {
        QuotaEnforcer::new(
            store,
            QuotaConfig {
                default_limit: limit,
                default_window_secs: window_secs,
                overrides: HashMap::new(),
            },
        )
    }

    fn window(
        user_id: UserId,
        count: i32,
        limit: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RateLimitWindow {
        RateLimitWindow {
            id: Uuid::now_v7(),
            user_id,
            resource_type: ResourceType::EmailSend.to_string(),
            window_start: start,
            window_end: end,
            limit_value: limit,
            request_count: count,
            created_at: start,
            updated_at: start,
        }
    }

    #[tokio::test]
    async fn test_full_window_is_refused_with_retry_after() {
        let store = Arc::new(MemoryStore::new());
        let quota = enforcer(store.clone(), 100, 3600);
        let user = Uuid::now_v7();
        let now = Utc::now();
        let full = window(
            user,
            100,
            100,
            now - chrono::Duration::minutes(30),
            now + chrono::Duration::minutes(30),
        );
        store.put_window(full.clone()).await;

        let err = quota.increment(user, ResourceType::EmailSend).await.unwrap_err();
        let retry = err.retry_after().unwrap();
        assert!(err.is_retryable());
        assert!(retry.as_secs() >= 1795 && retry.as_secs() <= 1800, "{:?}", retry);

        let active = store
            .get_active(user, ResourceType::EmailSend, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, full.id);
        assert_eq!(active.request_count, 100);
        assert!(quota.is_exceeded(user, ResourceType::EmailSend).await.unwrap());
        assert_eq!(quota.remaining(user, ResourceType::EmailSend).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_windows_are_created_lazily_and_counted() {
        let store = Arc::new(MemoryStore::new());
        let quota = enforcer(store.clone(), 3, 60);
        let user = Uuid::now_v7();

        assert_eq!(quota.remaining(user, ResourceType::EmailSend).await.unwrap(), 3);
        assert_eq!(store.window_count().await, 0);

        for expected in 1..=3 {
            let window = quota.increment(user, ResourceType::EmailSend).await.unwrap();
            assert_eq!(window.request_count, expected);
        }
        assert_eq!(store.window_count().await, 1);
        assert!(quota.increment(user, ResourceType::EmailSend).await.is_err());

        // Other resources and users are independent
        assert!(quota.increment(user, ResourceType::ApiRequest).await.is_ok());
        assert!(quota.increment(Uuid::now_v7(), ResourceType::EmailSend).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_window_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        let quota = enforcer(store.clone(), 5, 60);
        let user = Uuid::now_v7();
        let now = Utc::now();
        store
            .put_window(window(
                user,
                5,
                5,
                now - chrono::Duration::hours(2),
                now - chrono::Duration::hours(1),
            ))
            .await;

        let fresh = quota.increment(user, ResourceType::EmailSend).await.unwrap();
        assert_eq!(fresh.request_count, 1);
        assert!(fresh.window_start >= now);

        assert_eq!(quota.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.window_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_exceed_limit() {
        let store = Arc::new(MemoryStore::new());
        let quota = Arc::new(enforcer(store.clone(), 10, 3600));
        let user = Uuid::now_v7();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let quota = quota.clone();
            handles.push(tokio::spawn(async move {
                quota.increment(user, ResourceType::EmailSend).await
            }));
        }

        let mut admitted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(Error::QuotaExceeded { .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!((admitted, refused), (10, 40));
        assert_eq!(store.window_count().await, 1);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "campaign_send".to_string(),
            QuotaLimit {
                limit: 5,
                window_secs: 86_400,
            },
        );
        let quota = QuotaEnforcer::new(
            Arc::new(MemoryStore::new()),
            QuotaConfig {
                overrides,
                ..QuotaConfig::default()
            },
        );
        assert_eq!(quota.policy(ResourceType::CampaignSend).limit, 5);
        assert_eq!(quota.policy(ResourceType::EmailSend).limit, 100);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc::now();
        let w = window(Uuid::now_v7(), 1, 1, now, now + chrono::Duration::milliseconds(1500));
        assert_eq!(retry_after(&w, now), Duration::from_secs(2));

        let ended = window(Uuid::now_v7(), 1, 1, now, now);
        assert_eq!(retry_after(&ended, now), Duration::from_secs(1));
    }
}
