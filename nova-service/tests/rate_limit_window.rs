//! Fixed-window budgets on both store backends.

use std::sync::Arc;
use std::time::Duration;

use nova_service::{RateLimitDecision, RateLimitFailurePolicy, RateLimiter};
use nova_storage::{CounterStore, InMemoryStore, LmdbStore};
use nova_test_utils::fixtures::at;
use tempfile::TempDir;

const ENDPOINT: &str = "generate-content";
const WINDOW: Duration = Duration::from_secs(60);

async fn window_cycle<S: CounterStore>(limiter: &RateLimiter<S>) {
    for secs in [0, 10, 20] {
        assert!(limiter
            .try_consume_at("learner", ENDPOINT, 3, WINDOW, at(secs))
            .await
            .is_allowed());
    }

    assert_eq!(
        limiter
            .try_consume_at("learner", ENDPOINT, 3, WINDOW, at(30))
            .await,
        RateLimitDecision::BudgetExceeded {
            retry_after: Duration::from_secs(30)
        }
    );

    // Denied calls inside the window do not extend it.
    assert!(!limiter
        .try_consume_at("learner", ENDPOINT, 3, WINDOW, at(59))
        .await
        .is_allowed());

    assert_eq!(
        limiter
            .try_consume_at("learner", ENDPOINT, 3, WINDOW, at(60))
            .await,
        RateLimitDecision::Allowed { remaining: 2 }
    );
}

#[tokio::test]
async fn in_memory_window_cycle() {
    let limiter = RateLimiter::new(
        Arc::new(InMemoryStore::new()),
        RateLimitFailurePolicy::FailClosed,
    );
    window_cycle(&limiter).await;
}

#[tokio::test]
async fn lmdb_window_cycle() {
    let dir = TempDir::new().unwrap();
    let limiter = RateLimiter::new(
        Arc::new(LmdbStore::open(dir.path(), 16).unwrap()),
        RateLimitFailurePolicy::FailClosed,
    );
    window_cycle(&limiter).await;
}

#[tokio::test]
async fn lmdb_counters_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let limiter = RateLimiter::new(
            Arc::new(LmdbStore::open(dir.path(), 16).unwrap()),
            RateLimitFailurePolicy::FailClosed,
        );
        for secs in 0..2 {
            limiter
                .try_consume_at("learner", ENDPOINT, 2, WINDOW, at(secs))
                .await;
        }
    }

    let reopened = RateLimiter::new(
        Arc::new(LmdbStore::open(dir.path(), 16).unwrap()),
        RateLimitFailurePolicy::FailClosed,
    );
    assert!(!reopened
        .try_consume_at("learner", ENDPOINT, 2, WINDOW, at(5))
        .await
        .is_allowed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lmdb_concurrent_callers_never_exceed_limit() {
    let dir = TempDir::new().unwrap();
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(LmdbStore::open(dir.path(), 16).unwrap()),
        RateLimitFailurePolicy::FailClosed,
    ));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter
                .try_consume_at("learner", ENDPOINT, 5, WINDOW, at(0))
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
    assert_eq!(allowed, 5);
}
