use crate::dedup::DedupEngine;
use crate::distill::Distiller;
use crate::error::{MemoryError, MemoryResult};
use crate::promotion::{CycleReport, PromotionEngine};
use crate::recall::{RecallOrchestrator, RecallResult};
use crate::salience::{FlushReport, SalienceTracker};
use crate::scheduler::MaintenanceScheduler;
use crate::telemetry::EngineTelemetry;
use crate::working::WorkingMemoryStore;
use crate::{DynCompletion, DynReranker, DynVectorIndex};
use config::Config;
use engram_core::types::{IndexRecord, RecallIntent, WorkingMemoryTurn};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one `remember` pass over a session's working memory.
#[derive(Debug, Default)]
pub struct RememberReport {
    pub facts_distilled: usize,
    pub facts_written: usize,
    pub facts_merged: usize,
}

/// Facade over the whole memory engine: working memory, distillation,
/// dedup, recall, salience, promotion, and scheduled maintenance behind one
/// handle.
pub struct MemoryEngine {
    config: Config,
    index: DynVectorIndex,
    working: Arc<WorkingMemoryStore>,
    recall: RecallOrchestrator,
    dedup: DedupEngine,
    salience: Arc<SalienceTracker>,
    distiller: Distiller,
    scheduler: MaintenanceScheduler,
    telemetry: Arc<EngineTelemetry>,
    reranker: Option<DynReranker>,
}

impl MemoryEngine {
    pub fn new(config: Config, index: DynVectorIndex, completion: DynCompletion) -> Self {
        Self::with_parts(config, index, completion, None)
    }

    /// Attaches a reranker to recall. Replaces any existing one.
    #[must_use]
    pub fn with_reranker(self, reranker: DynReranker) -> Self {
        let completion = self.distiller.completion_handle();
        Self::with_parts(self.config, self.index, completion, Some(reranker))
    }

    /// Wraps the completion service in the resilience layer (cache, retry,
    /// rate limiting, circuit breaker) configured under `resilience`.
    #[must_use]
    pub fn with_resilient_completion(self) -> Self {
        let wrapped: DynCompletion = Arc::new(crate::resilience::ResilientCompletion::new(
            self.distiller.completion_handle(),
            self.config.resilience.clone(),
            self.telemetry.clone(),
        ));
        Self::with_parts(self.config, self.index, wrapped, self.reranker)
    }

    fn with_parts(
        config: Config,
        index: DynVectorIndex,
        completion: DynCompletion,
        reranker: Option<DynReranker>,
    ) -> Self {
        let telemetry = Arc::new(EngineTelemetry::new());
        let working = Arc::new(WorkingMemoryStore::new(config.working_memory.window_turns));
        let salience = Arc::new(SalienceTracker::new(
            index.clone(),
            config.salience.clone(),
            telemetry.clone(),
        ));
        let promotion = Arc::new(PromotionEngine::new(
            index.clone(),
            config.promotion.clone(),
            telemetry.clone(),
        ));
        let scheduler = MaintenanceScheduler::new(
            promotion,
            salience.clone(),
            working.clone(),
            config.scheduler.clone(),
            config.working_memory.clone(),
            telemetry.clone(),
        );

        info!(
            window_turns = config.working_memory.window_turns,
            dedup_threshold = config.dedup.similarity_threshold,
            "Memory engine initialized"
        );

        Self {
            recall: RecallOrchestrator::new(
                index.clone(),
                reranker.clone(),
                config.recall.clone(),
                telemetry.clone(),
            ),
            reranker,
            dedup: DedupEngine::new(index.clone(), config.dedup.clone(), telemetry.clone()),
            distiller: Distiller::new(completion, config.distillation.clone(), telemetry.clone()),
            working,
            salience,
            scheduler,
            telemetry,
            index,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Records one completed conversation turn in working memory.
    pub fn observe(
        &self,
        session_id: &str,
        user_message: impl Into<String>,
        assistant_message: impl Into<String>,
    ) -> WorkingMemoryTurn {
        let turn_number = self
            .working
            .recent(session_id, 1)
            .last()
            .map_or(0, |last| last.turn_number + 1);
        let turn = WorkingMemoryTurn::new(session_id, turn_number, user_message, assistant_message);
        self.working.append(turn.clone());
        self.telemetry
            .record_working_memory_sessions(self.working.session_count());
        turn
    }

    /// Returns the most recent `n` turns of a session, oldest first.
    pub fn recent_turns(&self, session_id: &str, n: usize) -> Vec<WorkingMemoryTurn> {
        self.working.recent(session_id, n)
    }

    /// Distills the session's working memory into episodic facts,
    /// deduplicates them, and writes the survivors to the index.
    pub async fn remember(&self, session_id: &str) -> MemoryResult<RememberReport> {
        let turns = self.working.all(session_id);
        let distilled = self.distiller.distill(session_id, &turns).await;
        let facts_distilled = distilled.facts_created();
        if facts_distilled == 0 {
            return Ok(RememberReport::default());
        }

        let outcome = self.dedup.deduplicate_batch(distilled.facts).await;
        let facts_merged = outcome.merged_count;
        let records: Vec<IndexRecord> = outcome.to_write.iter().map(IndexRecord::from_fact).collect();
        let facts_written = records.len();

        if !records.is_empty() {
            self.index
                .upsert(records)
                .await
                .map_err(|err| MemoryError::IndexError(err.to_string()))?;
        }

        debug!(
            session_id,
            facts_distilled, facts_written, facts_merged, "Remember pass complete"
        );
        Ok(RememberReport {
            facts_distilled,
            facts_written,
            facts_merged,
        })
    }

    /// Recalls relevant memories for a query. Every returned hit counts as
    /// a usage toward its salience.
    pub async fn recall(
        &self,
        query: &str,
        session_id: Option<&str>,
        intent: RecallIntent,
    ) -> RecallResult {
        self.recall_with(query, session_id, intent, &[], None, None)
            .await
    }

    /// Recall with entity scoping and per-call result counts.
    pub async fn recall_with(
        &self,
        query: &str,
        session_id: Option<&str>,
        intent: RecallIntent,
        entities: &[String],
        k_episodic: Option<usize>,
        k_semantic: Option<usize>,
    ) -> RecallResult {
        let result = self
            .recall
            .recall_with(query, session_id, intent, entities, k_episodic, k_semantic)
            .await;
        let ids: Vec<String> = result.combined.iter().map(|hit| hit.id.clone()).collect();
        if !ids.is_empty() {
            self.salience.track_usage(&ids).await;
        }
        result
    }

    /// Records that the agent cited these memories in a response.
    pub async fn cite(&self, ids: &[String]) -> FlushReport {
        self.salience.track_citations(ids).await
    }

    pub async fn flush_salience(&self) -> FlushReport {
        self.salience.flush().await
    }

    pub async fn run_promotion(&self) -> CycleReport {
        self.scheduler.run_manual_promotion().await
    }

    /// TTL and idle-session cleanup; returns (facts removed, sessions
    /// removed).
    pub async fn run_cleanup(&self) -> (usize, usize) {
        self.scheduler.run_manual_cleanup().await
    }

    pub async fn start_maintenance(&self) {
        self.scheduler.start().await;
    }

    pub async fn stop_maintenance(&self) {
        self.scheduler.stop().await;
    }

    pub fn maintenance_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Installs the Prometheus exporter on the configured port. A no-op
    /// when metrics are disabled.
    pub fn init_metrics(&self) -> MemoryResult<()> {
        if !self.config.observability.metrics_enabled {
            return Ok(());
        }
        let endpoint = ([0, 0, 0, 0], self.config.observability.metrics_port).into();
        crate::telemetry::init_telemetry_with_endpoint(endpoint)
            .map(|_| ())
            .map_err(|err| MemoryError::ConfigError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockCompletion, MockVectorIndex};
    use engram_core::traits::VectorIndexAdapter;
    use std::collections::HashMap;

    fn engine_with_response(response: &str) -> (MemoryEngine, Arc<MockVectorIndex>) {
        let index = Arc::new(MockVectorIndex::new());
        let engine = MemoryEngine::new(
            Config::default(),
            index.clone(),
            Arc::new(MockCompletion::new(vec![response.to_string()])),
        );
        (engine, index)
    }

    #[tokio::test]
    async fn test_observe_numbers_turns() {
        let (engine, _) = engine_with_response("[]");
        let first = engine.observe("s1", "hi", "hello");
        let second = engine.observe("s1", "how are you", "fine");
        assert_eq!(first.turn_number, 0);
        assert_eq!(second.turn_number, 1);
        assert_eq!(engine.recent_turns("s1", 10).len(), 2);
    }

    #[tokio::test]
    async fn test_remember_writes_distilled_facts() {
        let (engine, index) = engine_with_response(
            r#"[{"text": "the user works at acme", "entityTags": ["acme"]}]"#,
        );
        engine.observe("s1", "I work at acme", "Noted!");

        let report = engine.remember("s1").await.unwrap();
        assert_eq!(report.facts_distilled, 1);
        assert_eq!(report.facts_written, 1);
        assert_eq!(report.facts_merged, 0);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_remember_empty_session_is_noop() {
        let (engine, index) = engine_with_response("[]");
        let report = engine.remember("empty").await.unwrap();
        assert_eq!(report.facts_distilled, 0);
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_recall_tracks_usage() {
        let (engine, index) = engine_with_response(
            r#"[{"text": "deploys run on fridays", "entityTags": ["deploys"]}]"#,
        );
        engine.observe("s1", "when do we deploy?", "Fridays.");
        engine.remember("s1").await.unwrap();

        let ids: Vec<String> = index
            .scroll(HashMap::new(), 10)
            .await
            .unwrap()
            .iter()
            .map(|hit| hit.id.clone())
            .collect();
        index.set_similarity(&ids[0], 0.9).await;

        let result = engine
            .recall("deploy schedule", None, RecallIntent::General)
            .await;
        assert_eq!(result.combined.len(), 1);

        engine.flush_salience().await;
        let hit = index.get(&ids[0]).await.unwrap().unwrap();
        let stored = engram_core::types::EpisodicFact::from_hit(&hit).unwrap();
        assert!(stored.salience > 0.3);
    }

    #[tokio::test]
    async fn test_maintenance_start_stop() {
        let (engine, _) = engine_with_response("[]");
        assert!(!engine.maintenance_running());
        engine.start_maintenance().await;
        assert!(engine.maintenance_running());
        engine.stop_maintenance().await;
        assert!(!engine.maintenance_running());
    }
}
