use crate::error::{MemoryError, MemoryResult};
use crate::telemetry::EngineTelemetry;
use config::ResilienceConfig;
use engram_core::traits::CompletionService;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_probes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one external dependency.
///
/// Closed counts consecutive failures and opens at the threshold. Open
/// rejects calls until the recovery timeout, then admits a bounded number of
/// half-open probes. Enough consecutive probe successes close the breaker;
/// any probe failure reopens it.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_probes: u32,
    inner: Mutex<BreakerInner>,
    telemetry: Arc<EngineTelemetry>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &ResilienceConfig, telemetry: Arc<EngineTelemetry>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            half_open_max_probes: config.half_open_max_probes,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_probes: 0,
                opened_at: None,
            }),
            telemetry,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Whether a call may proceed right now. Handles the open to half-open
    /// transition and counts half-open probe admissions.
    pub async fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                if elapsed.is_some_and(|e| e >= self.recovery_timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_probes = 1;
                    info!(dependency = %self.name, "Circuit half-open, probing");
                    self.telemetry.record_circuit_half_open(&self.name);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.half_open_max_probes {
                    inner.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!(dependency = %self.name, "Circuit closed");
                    self.telemetry.record_circuit_closed(&self.name);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(dependency = %self.name, "Circuit opened");
                    self.telemetry.record_circuit_opened(&self.name);
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens immediately.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(dependency = %self.name, "Probe failed, circuit reopened");
                self.telemetry.record_circuit_opened(&self.name);
            }
            CircuitState::Open => {}
        }
    }
}

struct CacheEntry {
    value: serde_json::Value,
    cached_at: Instant,
}

#[derive(Debug, Clone)]
pub struct CallOutcome<T> {
    pub data: T,
    pub cached: bool,
    pub retry_count: usize,
    pub breaker_state: CircuitState,
}

/// Composed resilience wrapper for one external dependency: TTL result
/// cache, minimum call spacing, bounded retries with exponential backoff,
/// and a circuit breaker, applied in that order.
///
/// Cache keys are the SHA-256 of the canonical JSON of the call arguments,
/// so identical arguments hit the same entry regardless of field order at
/// the call site.
pub struct ResilientDependency {
    name: String,
    config: ResilienceConfig,
    breaker: CircuitBreaker,
    cache: Mutex<HashMap<String, CacheEntry>>,
    last_call: Mutex<Option<Instant>>,
    telemetry: Arc<EngineTelemetry>,
}

impl ResilientDependency {
    pub fn new(name: impl Into<String>, config: ResilienceConfig, telemetry: Arc<EngineTelemetry>) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), &config, telemetry.clone()),
            name,
            config,
            cache: Mutex::new(HashMap::new()),
            last_call: Mutex::new(None),
            telemetry,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn cache_key(args: &impl Serialize) -> MemoryResult<String> {
        let canonical = serde_json::to_string(args)
            .map_err(|err| MemoryError::SerializationError(err.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.cached_at.elapsed() < ttl => {
                serde_json::from_value(entry.value.clone()).ok()
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    async fn cache_put<T: Serialize>(&self, key: String, value: &T) {
        // A value that cannot be serialized simply is not cached.
        if let Ok(value) = serde_json::to_value(value) {
            let mut cache = self.cache.lock().await;
            cache.insert(
                key,
                CacheEntry {
                    value,
                    cached_at: Instant::now(),
                },
            );
        }
    }

    /// Delays until the minimum interval since the previous real call has
    /// passed, then stamps this call.
    async fn pace(&self) {
        let min_interval = Duration::from_millis(self.config.min_call_interval_ms);
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    /// Runs `operation` under the full wrapper. Arguments are only used to
    /// derive the cache key; the caller closes over them in `operation`.
    pub async fn call<T, A, F, Fut>(&self, args: &A, operation: F) -> MemoryResult<CallOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MemoryResult<T>>,
    {
        let key = Self::cache_key(args)?;

        if self.config.cache_enabled {
            if let Some(data) = self.cache_get::<T>(&key).await {
                self.telemetry.record_cache_hit(&self.name);
                debug!(dependency = %self.name, "Cache hit");
                return Ok(CallOutcome {
                    data,
                    cached: true,
                    retry_count: 0,
                    breaker_state: self.breaker.state().await,
                });
            }
            self.telemetry.record_cache_miss(&self.name);
        }

        if !self.breaker.can_execute().await {
            self.telemetry.record_circuit_rejected(&self.name);
            return Err(MemoryError::CircuitOpen(self.name.clone()));
        }

        let mut retry_count = 0;
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);

        loop {
            // Every real attempt respects the minimum call spacing, retries
            // included.
            self.pace().await;
            match operation().await {
                Ok(data) => {
                    self.breaker.record_success().await;
                    if self.config.cache_enabled {
                        self.cache_put(key, &data).await;
                    }
                    return Ok(CallOutcome {
                        data,
                        cached: false,
                        retry_count,
                        breaker_state: self.breaker.state().await,
                    });
                }
                Err(err) => {
                    let attempts_left = retry_count + 1 < self.config.max_attempts;
                    if !err.is_retryable() || !attempts_left {
                        self.breaker.record_failure().await;
                        return Err(err);
                    }

                    retry_count += 1;
                    self.telemetry.record_retry(&self.name);
                    debug!(dependency = %self.name, retry = retry_count, error = %err, "Retrying call");

                    let jitter = rand::random::<f32>() * 0.3 + 0.85;
                    let delay = Duration::from_millis(
                        (backoff.as_millis() as f32 * jitter) as u64,
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }

    /// Like `call`, but returns `fallback` instead of an error when the
    /// dependency is unavailable (breaker open or retries exhausted).
    pub async fn call_or<T, A, F, Fut>(
        &self,
        args: &A,
        operation: F,
        fallback: T,
    ) -> CallOutcome<T>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MemoryResult<T>>,
    {
        match self.call(args, operation).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(dependency = %self.name, error = %err, "Falling back to static value");
                self.telemetry.record_fallback_used(&self.name);
                CallOutcome {
                    data: fallback,
                    cached: false,
                    retry_count: 0,
                    breaker_state: self.breaker.state().await,
                }
            }
        }
    }
}

/// Drop-in `CompletionService` that routes calls through a
/// `ResilientDependency`, so distillation gets caching, retries, and breaker
/// protection without knowing about any of it.
pub struct ResilientCompletion {
    inner: crate::DynCompletion,
    dependency: ResilientDependency,
}

impl ResilientCompletion {
    pub fn new(inner: crate::DynCompletion, config: ResilienceConfig, telemetry: Arc<EngineTelemetry>) -> Self {
        Self {
            inner,
            dependency: ResilientDependency::new("completion", config, telemetry),
        }
    }

    pub fn dependency(&self) -> &ResilientDependency {
        &self.dependency
    }
}

#[async_trait::async_trait]
impl CompletionService for ResilientCompletion {
    type Error = crate::BoxError;

    async fn complete(&self, prompt: &str) -> Result<String, Self::Error> {
        let outcome = self
            .dependency
            .call(&prompt, || async {
                self.inner
                    .complete(prompt)
                    .await
                    .map_err(|err| MemoryError::CompletionError(err.to_string()))
            })
            .await?;
        Ok(outcome.data)
    }
}
