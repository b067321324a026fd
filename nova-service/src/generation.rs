//! Generate-or-fetch pipeline.
//!
//! Sequences one artifact request: rate-limit check, cache lookup, claim,
//! bounded generation, store, release. Callers that lose the claim race
//! poll the cache until the winner's entry appears, the claim frees up, or
//! their wait budget runs out.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nova_core::{
    ArtifactKey, CacheEntry, ClaimStatus, GeneratedArtifact, GenerationError, NovaResult,
};
use nova_storage::{ArtifactCache, ArtifactCacheConfig, ArtifactStore, ClaimStore, CounterStore};
use tokio::time::Instant;

use crate::constants::{
    DEFAULT_CLAIM_POLL_MS, DEFAULT_CLAIM_WAIT_MS, DEFAULT_GENERATION_ENDPOINT,
    DEFAULT_GENERATION_LIMIT, DEFAULT_GENERATION_TIMEOUT_SECS, DEFAULT_GENERATION_WINDOW_SECS,
};
use crate::rate_limit::{RateLimitFailurePolicy, RateLimiter};

/// Budget and timing for one generation endpoint.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Endpoint name the rate-limit budget is counted under.
    pub endpoint: String,
    /// Calls allowed per user per window.
    pub limit: u32,
    /// Fixed rate-limit window.
    pub window: Duration,
    /// Upper bound on one generation run.
    pub timeout: Duration,
    /// How long to wait on another caller's in-flight generation.
    pub claim_wait: Duration,
    /// Poll interval while waiting.
    pub poll_interval: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GENERATION_ENDPOINT.to_string(),
            limit: DEFAULT_GENERATION_LIMIT,
            window: Duration::from_secs(DEFAULT_GENERATION_WINDOW_SECS),
            timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            claim_wait: Duration::from_millis(DEFAULT_CLAIM_WAIT_MS),
            poll_interval: Duration::from_millis(DEFAULT_CLAIM_POLL_MS),
        }
    }
}

/// Where a returned artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Found in the cache on the first lookup.
    Cached,
    /// Produced by a concurrent caller while this one waited.
    Awaited,
    /// Generated by this call.
    Generated,
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactSource::Cached => "cached",
            ArtifactSource::Awaited => "awaited",
            ArtifactSource::Generated => "generated",
        };
        f.write_str(s)
    }
}

/// An artifact plus its provenance.
#[derive(Debug, Clone)]
pub struct ArtifactResponse {
    pub entry: CacheEntry,
    pub source: ArtifactSource,
}

enum Acquired {
    Ready(CacheEntry),
    Claim(ClaimStatus),
}

/// Rate-limited, de-duplicated access to expensive artifact generation.
pub struct GenerationPipeline<S>
where
    S: ArtifactStore + ClaimStore + CounterStore,
{
    cache: ArtifactCache<S>,
    limiter: RateLimiter<S>,
    config: GenerationConfig,
}

impl<S> GenerationPipeline<S>
where
    S: ArtifactStore + ClaimStore + CounterStore,
{
    /// Build a pipeline whose cache, claims and counters all live in `store`.
    ///
    /// A claim TTL shorter than the generation timeout is raised to the
    /// timeout, so a claim never lapses while its generation may still run.
    pub fn new(
        store: Arc<S>,
        mut cache_config: ArtifactCacheConfig,
        failure_policy: RateLimitFailurePolicy,
        config: GenerationConfig,
    ) -> Self {
        if cache_config.claim_ttl < config.timeout {
            tracing::warn!(
                claim_ttl_ms = cache_config.claim_ttl.as_millis() as u64,
                timeout_ms = config.timeout.as_millis() as u64,
                "Claim TTL shorter than generation timeout; raising it"
            );
            cache_config.claim_ttl = config.timeout;
        }
        Self {
            cache: ArtifactCache::new(store.clone(), cache_config),
            limiter: RateLimiter::new(store, failure_policy),
            config,
        }
    }

    pub fn cache(&self) -> &ArtifactCache<S> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Return the artifact for `key`, generating it with `generate` on a miss.
    ///
    /// `requester_id` is charged one call against the endpoint budget
    /// before anything else happens, cache hits included.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::RateLimited`] when the budget is spent
    /// - [`GenerationError::LimiterUnavailable`] when the limiter store is
    ///   down and the policy fails closed
    /// - [`GenerationError::InFlight`] when another caller kept the claim
    ///   for the whole wait budget without producing an entry
    /// - [`GenerationError::TimedOut`] / [`GenerationError::Failed`] from the
    ///   generator itself
    pub async fn generate_or_fetch<F, Fut, E>(
        &self,
        requester_id: &str,
        key: &ArtifactKey,
        generate: F,
    ) -> NovaResult<ArtifactResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GeneratedArtifact, E>>,
        E: fmt::Display,
    {
        let decision = self
            .limiter
            .try_consume(
                requester_id,
                &self.config.endpoint,
                self.config.limit,
                self.config.window,
            )
            .await;
        if let Some(denial) = decision.denial(&self.config.endpoint) {
            return Err(denial.into());
        }

        if let Some(entry) = self.cache.get(key).await {
            return Ok(ArtifactResponse {
                entry,
                source: ArtifactSource::Cached,
            });
        }

        let claim = match self.acquire(key).await? {
            Acquired::Ready(entry) => {
                return Ok(ArtifactResponse {
                    entry,
                    source: ArtifactSource::Awaited,
                })
            }
            Acquired::Claim(claim) => claim,
        };

        // The previous holder may have stored its entry between our lookup
        // and our claim.
        if claim.marker().is_some() {
            if let Some(entry) = self.cache.get(key).await {
                self.cache.release(&claim).await;
                return Ok(ArtifactResponse {
                    entry,
                    source: ArtifactSource::Awaited,
                });
            }
        }

        let artifact = match self.run_generator(key, generate).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.cache.release(&claim).await;
                return Err(e.into());
            }
        };

        let entry = self.cache.put(key, artifact).await;
        self.cache.release(&claim).await;

        tracing::info!(
            key = %key,
            generation_ms = entry.generation_ms,
            guarded = claim.marker().is_some(),
            "Artifact generated"
        );

        Ok(ArtifactResponse {
            entry,
            source: ArtifactSource::Generated,
        })
    }

    /// Take the claim, or wait for whoever holds it.
    async fn acquire(&self, key: &ArtifactKey) -> NovaResult<Acquired> {
        let started = Instant::now();
        loop {
            let status = self.cache.claim(key).await;
            if status.may_generate() {
                return Ok(Acquired::Claim(status));
            }

            let waited = started.elapsed();
            if waited >= self.config.claim_wait {
                tracing::warn!(
                    key = %key,
                    waited_ms = waited.as_millis() as u64,
                    "Gave up waiting on in-flight generation"
                );
                return Err(GenerationError::InFlight {
                    key: key.to_string(),
                    waited_ms: waited.as_millis() as u64,
                }
                .into());
            }

            let remaining = self.config.claim_wait - waited;
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;

            if let Some(entry) = self.cache.get(key).await {
                return Ok(Acquired::Ready(entry));
            }
        }
    }

    async fn run_generator<F, Fut, E>(
        &self,
        key: &ArtifactKey,
        generate: F,
    ) -> Result<GeneratedArtifact, GenerationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GeneratedArtifact, E>>,
        E: fmt::Display,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.config.timeout, generate()).await {
            Ok(Ok(artifact)) => {
                if artifact.generation_ms > 0 {
                    return Ok(artifact);
                }
                let elapsed = started.elapsed().as_millis() as i64;
                Ok(artifact.with_generation_ms(elapsed))
            }
            Ok(Err(e)) => {
                tracing::error!(key = %key, error = %e, "Artifact generation failed");
                Err(GenerationError::Failed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::error!(
                    key = %key,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Artifact generation timed out"
                );
                Err(GenerationError::TimedOut {
                    key: key.to_string(),
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })
            }
        }
    }
}
