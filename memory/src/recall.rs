use crate::telemetry::EngineTelemetry;
use crate::{DynReranker, DynVectorIndex};
use config::RecallConfig;
use engram_core::types::{MemoryTier, RecallIntent, SearchHit};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a recall pass over both long-term tiers.
#[derive(Debug, Clone)]
pub struct RecallResult {
    pub episodic: Vec<SearchHit>,
    pub semantic: Vec<SearchHit>,
    /// Merged, deduplicated, ordered view the caller should consume.
    pub combined: Vec<SearchHit>,
}

impl RecallResult {
    pub fn empty() -> Self {
        Self {
            episodic: Vec::new(),
            semantic: Vec::new(),
            combined: Vec::new(),
        }
    }
}

/// Fans a query out to the episodic and semantic tiers concurrently, merges
/// the hits with episodic priority on exact text collisions, and optionally
/// reranks the merged list.
///
/// A tier that fails degrades to empty results rather than failing the whole
/// recall; only the caller's query shape can make `recall` itself fail.
pub struct RecallOrchestrator {
    index: DynVectorIndex,
    reranker: Option<DynReranker>,
    config: RecallConfig,
    telemetry: Arc<EngineTelemetry>,
}

impl RecallOrchestrator {
    pub fn new(
        index: DynVectorIndex,
        reranker: Option<DynReranker>,
        config: RecallConfig,
        telemetry: Arc<EngineTelemetry>,
    ) -> Self {
        Self {
            index,
            reranker,
            config,
            telemetry,
        }
    }

    pub async fn recall(
        &self,
        query: &str,
        session_id: Option<&str>,
        intent: RecallIntent,
    ) -> RecallResult {
        self.recall_with(query, session_id, intent, &[], None, None)
            .await
    }

    /// Full recall surface: `entities` narrows the semantic tier to
    /// documents tagged with any of them, and the per-tier `k` values
    /// override the configured defaults when given.
    pub async fn recall_with(
        &self,
        query: &str,
        session_id: Option<&str>,
        intent: RecallIntent,
        entities: &[String],
        k_episodic: Option<usize>,
        k_semantic: Option<usize>,
    ) -> RecallResult {
        // The verified gate applies to the semantic query only; episodic
        // context stays session-scoped regardless of intent.
        let episodic_filter = self.tier_filter(MemoryTier::Episodic, session_id, false, &[]);
        let semantic_filter =
            self.tier_filter(MemoryTier::Semantic, None, intent.requires_verified(), entities);
        let k_episodic = k_episodic.unwrap_or(self.config.k_episodic);
        let k_semantic = k_semantic.unwrap_or(self.config.k_semantic);

        let (episodic_hits, semantic_hits) = tokio::join!(
            self.search_tier(query, k_episodic, episodic_filter, "episodic"),
            self.search_tier(query, k_semantic, semantic_filter, "semantic"),
        );

        let combined = self.merge(episodic_hits.clone(), semantic_hits.clone());
        let combined = self.maybe_rerank(query, combined).await;

        self.telemetry
            .record_recall(episodic_hits.len(), semantic_hits.len(), combined.len());
        debug!(
            episodic = episodic_hits.len(),
            semantic = semantic_hits.len(),
            combined = combined.len(),
            "Recall complete"
        );

        RecallResult {
            episodic: episodic_hits,
            semantic: semantic_hits,
            combined,
        }
    }

    fn tier_filter(
        &self,
        tier: MemoryTier,
        session_id: Option<&str>,
        verified_only: bool,
        entities: &[String],
    ) -> HashMap<String, serde_json::Value> {
        let mut filter = HashMap::new();
        filter.insert("tier".to_string(), serde_json::json!(tier));
        if let Some(session) = session_id {
            filter.insert("sessionId".to_string(), serde_json::json!(session));
        }
        if !entities.is_empty() {
            filter.insert("entityTags".to_string(), serde_json::json!(entities));
        }
        if verified_only {
            filter.insert("verified".to_string(), serde_json::json!(true));
        }
        filter
    }

    async fn search_tier(
        &self,
        query: &str,
        k: usize,
        filter: HashMap<String, serde_json::Value>,
        tier: &str,
    ) -> Vec<SearchHit> {
        match self.index.similarity_search(query, k, filter).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(tier, error = %err, "Tier search failed, degrading to empty results");
                self.telemetry.record_recall_tier_degraded(tier);
                Vec::new()
            }
        }
    }

    /// Merge with episodic priority: a semantic hit whose text exactly
    /// matches an episodic hit is dropped. The result is ordered by score
    /// descending, then tier, then id, so repeated recalls over identical
    /// hits always produce the same list.
    fn merge(&self, episodic: Vec<SearchHit>, semantic: Vec<SearchHit>) -> Vec<SearchHit> {
        let mut seen_texts: HashSet<String> = HashSet::new();
        let mut combined: Vec<(SearchHit, u8)> = Vec::new();

        for hit in episodic {
            seen_texts.insert(hit.text.clone());
            combined.push((hit, 0));
        }
        for hit in semantic {
            if seen_texts.contains(&hit.text) {
                continue;
            }
            combined.push((hit, 1));
        }

        combined.sort_by(|(a, a_tier), (b, b_tier)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_tier.cmp(b_tier))
                .then_with(|| a.id.cmp(&b.id))
        });

        combined.into_iter().map(|(hit, _)| hit).collect()
    }

    async fn maybe_rerank(&self, query: &str, combined: Vec<SearchHit>) -> Vec<SearchHit> {
        if !self.config.rerank_enabled || combined.len() < 2 {
            return self.truncate(combined);
        }
        let Some(reranker) = &self.reranker else {
            return self.truncate(combined);
        };

        let texts: Vec<String> = combined.iter().map(|hit| hit.text.clone()).collect();
        match reranker.rerank(query, &texts).await {
            Ok(order) => {
                let mut reordered = Vec::with_capacity(combined.len());
                let mut used: HashSet<usize> = HashSet::new();
                for idx in order {
                    if idx < combined.len() && used.insert(idx) {
                        reordered.push(combined[idx].clone());
                    }
                }
                // Indices the reranker omitted keep their score order below
                // the ranked ones.
                for (idx, hit) in combined.into_iter().enumerate() {
                    if !used.contains(&idx) {
                        reordered.push(hit);
                    }
                }
                self.truncate(reordered)
            }
            Err(err) => {
                warn!(error = %err, "Rerank failed, falling back to score ordering");
                self.telemetry.record_rerank_fallback();
                self.truncate(combined)
            }
        }
    }

    fn truncate(&self, mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
        hits.truncate(self.config.rerank_top_k);
        hits
    }
}
