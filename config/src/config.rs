//! # Configuration Structures
//!
//! This module defines all configuration structures for the Engram memory
//! engine.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization
//! - Use `validator` for input validation
//! - Provide defaults through `default_*` functions so partial config files
//!   stay valid

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Main configuration structure for the Engram memory engine.
///
/// Aggregates all subsystem configurations. Every section has defaults, so
/// `Config::default()` is a fully working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Per-session working-memory window
    #[serde(default)]
    #[validate(nested)]
    pub working_memory: WorkingMemoryConfig,

    /// Recall fan-out and reranking
    #[serde(default)]
    #[validate(nested)]
    pub recall: RecallConfig,

    /// Fact distillation
    #[serde(default)]
    #[validate(nested)]
    pub distillation: DistillationConfig,

    /// Near-duplicate detection and merge
    #[serde(default)]
    #[validate(nested)]
    pub dedup: DedupConfig,

    /// Batched salience updates
    #[serde(default)]
    #[validate(nested)]
    pub salience: SalienceConfig,

    /// Promotion criteria for the episodic → semantic transition
    #[serde(default)]
    #[validate(nested)]
    pub promotion: PromotionConfig,

    /// Background maintenance intervals
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Resilience wrapper for external dependencies
    #[serde(default)]
    #[validate(nested)]
    pub resilience: ResilienceConfig,

    /// Metrics and tracing
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Initializes configuration from `ENGRAM_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn detect_env() -> Self {
        let mut config = Self::default();

        if let Ok(threshold) = std::env::var("ENGRAM_DEDUP_THRESHOLD") {
            match threshold.parse::<f32>() {
                Ok(value) => config.dedup.similarity_threshold = value,
                Err(_) => tracing::warn!(value = %threshold, "Ignoring invalid ENGRAM_DEDUP_THRESHOLD"),
            }
        }

        if let Ok(window) = std::env::var("ENGRAM_WM_WINDOW_TURNS") {
            match window.parse::<usize>() {
                Ok(value) => config.working_memory.window_turns = value,
                Err(_) => tracing::warn!(value = %window, "Ignoring invalid ENGRAM_WM_WINDOW_TURNS"),
            }
        }

        if let Ok(rerank) = std::env::var("ENGRAM_RERANK_ENABLED") {
            config.recall.rerank_enabled = rerank.to_lowercase() == "true" || rerank == "1";
        }

        if let Ok(port) = std::env::var("ENGRAM_METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(value) => config.observability.metrics_port = value,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid ENGRAM_METRICS_PORT"),
            }
        }

        config
    }
}

/// Per-session working-memory window configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WorkingMemoryConfig {
    /// Maximum turns retained per session before the oldest is evicted
    #[serde(default = "default_window_turns")]
    #[validate(range(min = 1))]
    pub window_turns: usize,

    /// Seconds of inactivity before a session is eligible for cleanup
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_window_turns() -> usize {
    20
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            window_turns: default_window_turns(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Recall fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RecallConfig {
    /// Default number of episodic candidates per recall
    #[serde(default = "default_k_episodic")]
    #[validate(range(min = 1))]
    pub k_episodic: usize,

    /// Default number of semantic candidates per recall
    #[serde(default = "default_k_semantic")]
    #[validate(range(min = 1))]
    pub k_semantic: usize,

    /// Whether to apply the reranker when one is configured
    #[serde(default = "default_rerank_enabled")]
    pub rerank_enabled: bool,

    /// Size of the combined list after reranking (or fallback truncation)
    #[serde(default = "default_rerank_top_k")]
    #[validate(range(min = 1))]
    pub rerank_top_k: usize,
}

fn default_k_episodic() -> usize {
    8
}

fn default_k_semantic() -> usize {
    8
}

fn default_rerank_enabled() -> bool {
    true
}

fn default_rerank_top_k() -> usize {
    10
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            k_episodic: default_k_episodic(),
            k_semantic: default_k_semantic(),
            rerank_enabled: default_rerank_enabled(),
            rerank_top_k: default_rerank_top_k(),
        }
    }
}

/// Fact distillation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DistillationConfig {
    /// Salience assigned to freshly distilled facts
    #[serde(default = "default_initial_salience")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub initial_salience: f32,

    /// Days until a new episodic fact expires
    #[serde(default = "default_fact_ttl_days")]
    #[validate(range(min = 1))]
    pub fact_ttl_days: i64,

    /// Upper bound on facts accepted from a single distillation pass
    #[serde(default = "default_max_facts_per_pass")]
    #[validate(range(min = 1))]
    pub max_facts_per_pass: usize,
}

fn default_initial_salience() -> f32 {
    0.3
}

fn default_fact_ttl_days() -> i64 {
    30
}

fn default_max_facts_per_pass() -> usize {
    10
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            initial_salience: default_initial_salience(),
            fact_ttl_days: default_fact_ttl_days(),
            max_facts_per_pass: default_max_facts_per_pass(),
        }
    }
}

/// Near-duplicate detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DedupConfig {
    /// Similarity at or above which a candidate is merged into an existing
    /// fact instead of being written
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,

    /// Nearest neighbors examined per candidate
    #[serde(default = "default_dedup_top_k")]
    #[validate(range(min = 1))]
    pub top_k: usize,

    /// Salience added to the surviving fact on merge
    #[serde(default = "default_merge_salience_increment")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub merge_salience_increment: f32,

    /// Days added to the surviving fact's TTL on merge
    #[serde(default = "default_ttl_extension_days")]
    #[validate(range(min = 0))]
    pub ttl_extension_days: i64,
}

fn default_similarity_threshold() -> f32 {
    0.92
}

fn default_dedup_top_k() -> usize {
    5
}

fn default_merge_salience_increment() -> f32 {
    0.1
}

fn default_ttl_extension_days() -> i64 {
    14
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            top_k: default_dedup_top_k(),
            merge_salience_increment: default_merge_salience_increment(),
            ttl_extension_days: default_ttl_extension_days(),
        }
    }
}

/// Batched salience update configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SalienceConfig {
    /// Increment applied per passive retrieval
    #[serde(default = "default_usage_increment")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub usage_increment: f32,

    /// Increment applied per citation; larger than the usage increment
    #[serde(default = "default_citation_increment")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub citation_increment: f32,

    /// Distinct pending doc ids that force an automatic flush
    #[serde(default = "default_flush_batch_size")]
    #[validate(range(min = 1))]
    pub flush_batch_size: usize,
}

fn default_usage_increment() -> f32 {
    0.05
}

fn default_citation_increment() -> f32 {
    0.15
}

fn default_flush_batch_size() -> usize {
    50
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            usage_increment: default_usage_increment(),
            citation_increment: default_citation_increment(),
            flush_batch_size: default_flush_batch_size(),
        }
    }
}

/// Promotion criteria. Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct PromotionConfig {
    /// Minimum salience for promotion
    #[serde(default = "default_salience_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub salience_threshold: f32,

    /// Minimum citation count for promotion
    #[serde(default = "default_min_citation_count")]
    pub min_citation_count: u32,

    /// Minimum age in days for promotion
    #[serde(default = "default_min_age_days")]
    #[validate(range(min = 0.0))]
    pub min_age_days: f64,

    /// Additionally require the episodic fact to be verified
    #[serde(default)]
    pub require_verified: bool,

    /// Upper bound on candidates examined per promotion cycle
    #[serde(default = "default_scan_limit")]
    #[validate(range(min = 1))]
    pub scan_limit: usize,
}

fn default_salience_threshold() -> f32 {
    0.8
}

fn default_min_citation_count() -> u32 {
    5
}

fn default_min_age_days() -> f64 {
    7.0
}

fn default_scan_limit() -> usize {
    256
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            salience_threshold: default_salience_threshold(),
            min_citation_count: default_min_citation_count(),
            min_age_days: default_min_age_days(),
            require_verified: false,
            scan_limit: default_scan_limit(),
        }
    }
}

/// Background maintenance intervals, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Promotion cycle interval (long; daily by default)
    #[serde(default = "default_promotion_interval_secs")]
    pub promotion_interval_secs: u64,

    /// Salience flush interval (short)
    #[serde(default = "default_salience_flush_interval_secs")]
    pub salience_flush_interval_secs: u64,

    /// TTL cleanup interval (medium)
    #[serde(default = "default_ttl_cleanup_interval_secs")]
    pub ttl_cleanup_interval_secs: u64,

    /// Idle-session cleanup interval (short-medium)
    #[serde(default = "default_session_cleanup_interval_secs")]
    pub session_cleanup_interval_secs: u64,
}

fn default_promotion_interval_secs() -> u64 {
    86_400
}

fn default_salience_flush_interval_secs() -> u64 {
    300
}

fn default_ttl_cleanup_interval_secs() -> u64 {
    21_600
}

fn default_session_cleanup_interval_secs() -> u64 {
    900
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            promotion_interval_secs: default_promotion_interval_secs(),
            salience_flush_interval_secs: default_salience_flush_interval_secs(),
            ttl_cleanup_interval_secs: default_ttl_cleanup_interval_secs(),
            session_cleanup_interval_secs: default_session_cleanup_interval_secs(),
        }
    }
}

/// Resilience wrapper configuration for one external dependency.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ResilienceConfig {
    /// Enable the TTL call cache
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// Seconds a cached result stays valid
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Minimum milliseconds between real (non-cached) calls
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,

    /// Maximum attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: usize,

    /// Initial retry backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on a single backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Consecutive failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the breaker
    #[serde(default = "default_success_threshold")]
    #[validate(range(min = 1))]
    pub success_threshold: u32,

    /// Seconds the breaker stays open before allowing probes
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Probe calls allowed while half-open
    #[serde(default = "default_half_open_max_probes")]
    #[validate(range(min = 1))]
    pub half_open_max_probes: u32,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_min_call_interval_ms() -> u64 {
    100
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_probes() -> u32 {
    3
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            cache_enabled: default_cache_enabled(),
            cache_ttl_secs: default_cache_ttl_secs(),
            min_call_interval_ms: default_min_call_interval_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_probes: default_half_open_max_probes(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Export Prometheus metrics
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    /// Prometheus scrape endpoint port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
            metrics_port: default_metrics_port(),
        }
    }
}
