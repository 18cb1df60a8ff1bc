use metrics::{counter, gauge, histogram};

/// Metrics collector for the engine. Purely observational: every recording
/// method is fire-and-forget and nothing in the engine depends on it.
#[derive(Debug)]
pub struct EngineTelemetry {
    _phantom: std::marker::PhantomData<()>,
}

impl Default for EngineTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineTelemetry {
    pub fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn record_recall(&self, episodic: usize, semantic: usize, combined: usize) {
        counter!("engram_recalls_total").increment(1);
        histogram!("engram_recall_episodic_results").record(episodic as f64);
        histogram!("engram_recall_semantic_results").record(semantic as f64);
        histogram!("engram_recall_combined_results").record(combined as f64);
    }

    pub fn record_recall_tier_degraded(&self, tier: &str) {
        counter!("engram_recall_tier_degraded_total",
            "tier" => tier.to_string()
        )
        .increment(1);
    }

    pub fn record_rerank_fallback(&self) {
        counter!("engram_rerank_fallback_total").increment(1);
    }

    pub fn record_distillation(&self, facts_created: usize) {
        counter!("engram_distillations_total").increment(1);
        histogram!("engram_distillation_facts_created").record(facts_created as f64);
    }

    pub fn record_distillation_failure(&self, error: &str) {
        counter!("engram_distillation_failures_total",
            "error_type" => error.to_string()
        )
        .increment(1);
    }

    pub fn record_dedup_decision(&self, action: &str) {
        counter!("engram_dedup_decisions_total",
            "action" => action.to_string()
        )
        .increment(1);
    }

    pub fn record_dedup_lookup_failure(&self) {
        counter!("engram_dedup_lookup_failures_total").increment(1);
    }

    pub fn record_salience_pending(&self, pending: usize) {
        gauge!("engram_salience_pending_updates").set(pending as f64);
    }

    pub fn record_salience_flush(&self, flushed: usize, failed: usize) {
        counter!("engram_salience_flushes_total").increment(1);
        counter!("engram_salience_updates_flushed_total").increment(flushed as u64);
        if failed > 0 {
            counter!("engram_salience_updates_failed_total").increment(failed as u64);
        }
    }

    pub fn record_promotion_cycle(&self, found: usize, promoted: usize, failed: usize) {
        counter!("engram_promotion_cycles_total").increment(1);
        counter!("engram_promotions_total").increment(promoted as u64);
        if failed > 0 {
            counter!("engram_promotion_failures_total").increment(failed as u64);
        }
        histogram!("engram_promotion_candidates_found").record(found as f64);
    }

    pub fn record_ttl_cleanup(&self, removed: usize) {
        counter!("engram_ttl_cleanup_runs_total").increment(1);
        counter!("engram_ttl_facts_removed_total").increment(removed as u64);
    }

    pub fn record_session_cleanup(&self, removed: usize) {
        counter!("engram_session_cleanup_runs_total").increment(1);
        counter!("engram_sessions_expired_total").increment(removed as u64);
    }

    pub fn record_working_memory_sessions(&self, sessions: usize) {
        gauge!("engram_working_memory_sessions").set(sessions as f64);
    }

    pub fn record_task_run(&self, task: &str, duration_ms: f64) {
        counter!("engram_scheduler_task_runs_total",
            "task" => task.to_string()
        )
        .increment(1);
        histogram!("engram_scheduler_task_duration_seconds",
            "task" => task.to_string()
        )
        .record(duration_ms / 1000.0);
    }

    pub fn record_task_failure(&self, task: &str, error: &str) {
        counter!("engram_scheduler_task_failures_total",
            "task" => task.to_string(),
            "error_type" => error.to_string()
        )
        .increment(1);
    }

    pub fn record_cache_hit(&self, dependency: &str) {
        counter!("engram_resilience_cache_hits_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
    }

    pub fn record_cache_miss(&self, dependency: &str) {
        counter!("engram_resilience_cache_misses_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
    }

    pub fn record_retry(&self, dependency: &str) {
        counter!("engram_resilience_retries_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
    }

    pub fn record_circuit_opened(&self, dependency: &str) {
        counter!("engram_circuit_opened_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
        gauge!("engram_circuit_unavailable",
            "dependency" => dependency.to_string()
        )
        .set(1.0);
    }

    pub fn record_circuit_half_open(&self, dependency: &str) {
        counter!("engram_circuit_half_open_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
        gauge!("engram_circuit_unavailable",
            "dependency" => dependency.to_string()
        )
        .set(0.5);
    }

    pub fn record_circuit_closed(&self, dependency: &str) {
        counter!("engram_circuit_closed_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
        gauge!("engram_circuit_unavailable",
            "dependency" => dependency.to_string()
        )
        .set(0.0);
    }

    pub fn record_circuit_rejected(&self, dependency: &str) {
        counter!("engram_circuit_rejected_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
    }

    pub fn record_fallback_used(&self, dependency: &str) {
        counter!("engram_resilience_fallback_total",
            "dependency" => dependency.to_string()
        )
        .increment(1);
    }
}

pub fn init_telemetry() -> Result<EngineTelemetry, Box<dyn std::error::Error + Send + Sync>> {
    init_telemetry_with_endpoint(([0, 0, 0, 0], 9090).into())
}

pub fn init_telemetry_with_endpoint(
    endpoint: std::net::SocketAddr,
) -> Result<EngineTelemetry, Box<dyn std::error::Error + Send + Sync>> {
    let telemetry = EngineTelemetry::new();

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(endpoint)
        .install()?;

    Ok(telemetry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn test_metrics_recording() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let telemetry = EngineTelemetry::new();

            telemetry.record_recall(3, 2, 4);
            telemetry.record_recall_tier_degraded("semantic");
            telemetry.record_distillation(2);
            telemetry.record_dedup_decision("merge_existing");
            telemetry.record_salience_flush(10, 1);
            telemetry.record_promotion_cycle(5, 3, 1);
            telemetry.record_ttl_cleanup(7);
            telemetry.record_cache_hit("vector_index");
            telemetry.record_circuit_opened("vector_index");
            telemetry.record_task_run("salience_flush", 12.0);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert!(!snapshot.is_empty(), "Expected metrics to be recorded");
    }
}
