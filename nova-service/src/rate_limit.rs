//! Per-user, per-endpoint fixed-window rate limiting.
//!
//! Every call is one atomic increment-and-compare against the shared
//! [`CounterStore`]; there is no separate read of the counter. Budget
//! exhaustion and store outage are reported as distinct decisions so
//! callers can tell "denied by policy" from "denied by outage".

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nova_core::{CounterKey, GenerationError, Timestamp};
use nova_storage::CounterStore;

/// What to answer when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitFailurePolicy {
    /// Deny the call.
    #[default]
    FailClosed,
    /// Allow the call unmetered.
    FailOpen,
}

/// Result of one [`RateLimiter::try_consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Within budget.
    Allowed {
        /// Calls still available in this window.
        remaining: u32,
    },
    /// Over budget for the current window.
    BudgetExceeded {
        /// Time until the window rolls over.
        retry_after: Duration,
    },
    /// The counter store failed; `allowed` reflects the failure policy.
    StoreUnavailable { allowed: bool },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        match self {
            RateLimitDecision::Allowed { .. } => true,
            RateLimitDecision::BudgetExceeded { .. } => false,
            RateLimitDecision::StoreUnavailable { allowed } => *allowed,
        }
    }

    /// Convert a denial into the matching [`GenerationError`].
    ///
    /// Returns `None` when the call was allowed.
    pub fn denial(&self, endpoint: &str) -> Option<GenerationError> {
        match self {
            RateLimitDecision::Allowed { .. } => None,
            RateLimitDecision::BudgetExceeded { retry_after } => {
                Some(GenerationError::RateLimited {
                    endpoint: endpoint.to_string(),
                    retry_after_secs: retry_after.as_secs_f64().ceil() as u64,
                })
            }
            RateLimitDecision::StoreUnavailable { allowed: true } => None,
            RateLimitDecision::StoreUnavailable { allowed: false } => {
                Some(GenerationError::LimiterUnavailable {
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }
}

/// Atomic fixed-window limiter over a shared counter store.
pub struct RateLimiter<S: CounterStore> {
    store: Arc<S>,
    policy: RateLimitFailurePolicy,
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn new(store: Arc<S>, policy: RateLimitFailurePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RateLimitFailurePolicy {
        self.policy
    }

    /// Count one call by `user_id` to `endpoint` against a budget of
    /// `limit` calls per `window`.
    pub async fn try_consume(
        &self,
        user_id: &str,
        endpoint: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        self.try_consume_at(user_id, endpoint, limit, window, Utc::now())
            .await
    }

    /// [`try_consume`](Self::try_consume) at an explicit instant.
    pub async fn try_consume_at(
        &self,
        user_id: &str,
        endpoint: &str,
        limit: u32,
        window: Duration,
        now: Timestamp,
    ) -> RateLimitDecision {
        let key = CounterKey::new(user_id, endpoint);
        match self
            .store
            .increment_and_check(&key, limit, window, now)
            .await
        {
            Ok(check) if check.allowed => RateLimitDecision::Allowed {
                remaining: limit.saturating_sub(check.count),
            },
            Ok(check) => {
                let retry_after = (check.window_end - now).to_std().unwrap_or_default();
                tracing::info!(
                    key = %key,
                    count = check.count,
                    limit,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                RateLimitDecision::BudgetExceeded { retry_after }
            }
            Err(e) => {
                let allowed = self.policy == RateLimitFailurePolicy::FailOpen;
                tracing::error!(
                    key = %key,
                    error = %e,
                    allowed,
                    "Rate limiter store unavailable"
                );
                RateLimitDecision::StoreUnavailable { allowed }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use nova_core::{NovaResult, StorageError};
    use nova_storage::{CounterCheck, InMemoryStore};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct DownCounters;

    #[async_trait]
    impl CounterStore for DownCounters {
        async fn increment_and_check(
            &self,
            _key: &CounterKey,
            _limit: u32,
            _window: Duration,
            _now: Timestamp,
        ) -> NovaResult<CounterCheck> {
            Err(StorageError::Unavailable {
                reason: "redis down".to_string(),
            }
            .into())
        }

        async fn purge_expired_counters(&self, _now: Timestamp) -> NovaResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_fourth_call_in_window_is_denied() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), Default::default());
        let window = Duration::from_secs(60);

        for (i, secs) in [0, 10, 20].into_iter().enumerate() {
            let decision = limiter.try_consume_at("u", "gen", 3, window, at(secs)).await;
            assert_eq!(
                decision,
                RateLimitDecision::Allowed {
                    remaining: 2 - i as u32
                }
            );
        }

        let denied = limiter.try_consume_at("u", "gen", 3, window, at(30)).await;
        assert_eq!(
            denied,
            RateLimitDecision::BudgetExceeded {
                retry_after: Duration::from_secs(30)
            }
        );
        assert!(!denied.is_allowed());

        let next_window = limiter.try_consume_at("u", "gen", 3, window, at(60)).await;
        assert!(next_window.is_allowed());
    }

    #[tokio::test]
    async fn test_budgets_are_per_user_and_endpoint() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), Default::default());
        let window = Duration::from_secs(60);

        assert!(limiter.try_consume_at("a", "gen", 1, window, at(0)).await.is_allowed());
        assert!(!limiter.try_consume_at("a", "gen", 1, window, at(1)).await.is_allowed());
        assert!(limiter.try_consume_at("b", "gen", 1, window, at(1)).await.is_allowed());
        assert!(limiter.try_consume_at("a", "img", 1, window, at(1)).await.is_allowed());
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed_by_default() {
        let limiter = RateLimiter::new(Arc::new(DownCounters), RateLimitFailurePolicy::default());
        let decision = limiter
            .try_consume("u", "gen", 10, Duration::from_secs(60))
            .await;
        assert_eq!(decision, RateLimitDecision::StoreUnavailable { allowed: false });
        assert!(matches!(
            decision.denial("gen"),
            Some(GenerationError::LimiterUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_outage_fail_open_policy() {
        let limiter = RateLimiter::new(Arc::new(DownCounters), RateLimitFailurePolicy::FailOpen);
        let decision = limiter
            .try_consume("u", "gen", 10, Duration::from_secs(60))
            .await;
        assert!(decision.is_allowed());
        assert!(decision.denial("gen").is_none());
    }

    #[test]
    fn test_budget_denial_rounds_retry_up() {
        let decision = RateLimitDecision::BudgetExceeded {
            retry_after: Duration::from_millis(1500),
        };
        match decision.denial("gen") {
            Some(GenerationError::RateLimited {
                endpoint,
                retry_after_secs,
            }) => {
                assert_eq!(endpoint, "gen");
                assert_eq!(retry_after_secs, 2);
            }
            other => panic!("unexpected denial: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryStore::new()),
            Default::default(),
        ));
        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .try_consume_at("u", "gen", 7, Duration::from_secs(60), at(0))
                    .await
                    .is_allowed()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 7);
    }
}
