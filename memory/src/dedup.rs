use crate::DynVectorIndex;
use crate::telemetry::EngineTelemetry;
use config::DedupConfig;
use engram_core::types::{EpisodicFact, MemoryTier};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DedupAction {
    WriteNew,
    MergeExisting,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub action: DedupAction,
    /// Id of the surviving fact when the action is a merge.
    pub merged_with: Option<String>,
}

impl DedupOutcome {
    pub fn is_duplicate(&self) -> bool {
        self.action == DedupAction::MergeExisting
    }

    fn write_new() -> Self {
        Self {
            action: DedupAction::WriteNew,
            merged_with: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Facts that survived dedup and should be written to the index.
    pub to_write: Vec<EpisodicFact>,
    pub merged_count: usize,
}

/// Near-duplicate detection for incoming episodic facts.
///
/// A candidate whose best same-session neighbor scores at or above the
/// similarity threshold is merged into that neighbor (salience bump, TTL
/// extension, last-seen touch) instead of being written. Lookup failures
/// never block a write; the fact is written as new and the failure logged.
pub struct DedupEngine {
    index: DynVectorIndex,
    config: DedupConfig,
    telemetry: Arc<EngineTelemetry>,
}

impl DedupEngine {
    pub fn new(index: DynVectorIndex, config: DedupConfig, telemetry: Arc<EngineTelemetry>) -> Self {
        Self {
            index,
            config,
            telemetry,
        }
    }

    /// Decides whether `fact` is a near-duplicate of an existing episodic
    /// fact in the same session, and applies the merge when it is.
    pub async fn check_and_merge(&self, fact: &EpisodicFact) -> DedupOutcome {
        let mut filter = HashMap::new();
        filter.insert("tier".to_string(), serde_json::json!(MemoryTier::Episodic));
        filter.insert("sessionId".to_string(), serde_json::json!(fact.session_id));

        let hits = match self
            .index
            .similarity_search(&fact.text, self.config.top_k, filter)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "Dedup lookup failed, writing fact as new");
                self.telemetry.record_dedup_lookup_failure();
                self.telemetry
                    .record_dedup_decision(&DedupAction::WriteNew.to_string());
                return DedupOutcome::write_new();
            }
        };

        // Hits arrive score-descending; only the best match matters.
        let best = hits
            .iter()
            .find(|hit| hit.score >= self.config.similarity_threshold && hit.id != fact.id);

        let Some(best) = best else {
            self.telemetry
                .record_dedup_decision(&DedupAction::WriteNew.to_string());
            return DedupOutcome::write_new();
        };

        let Some(mut existing) = EpisodicFact::from_hit(best) else {
            warn!(id = %best.id, "Dedup match has unreadable metadata, writing fact as new");
            self.telemetry
                .record_dedup_decision(&DedupAction::WriteNew.to_string());
            return DedupOutcome::write_new();
        };

        let now = chrono::Utc::now().timestamp();
        existing.bump_salience(self.config.merge_salience_increment);
        existing.extend_ttl_days(self.config.ttl_extension_days);
        existing.touch(now);

        if let Err(err) = self
            .index
            .update_metadata(&existing.id, existing.to_metadata())
            .await
        {
            warn!(id = %existing.id, error = %err, "Dedup merge write failed, writing fact as new");
            self.telemetry.record_dedup_lookup_failure();
            self.telemetry
                .record_dedup_decision(&DedupAction::WriteNew.to_string());
            return DedupOutcome::write_new();
        }

        debug!(
            candidate = %fact.id,
            merged_with = %existing.id,
            score = best.score,
            "Merged near-duplicate fact"
        );
        self.telemetry
            .record_dedup_decision(&DedupAction::MergeExisting.to_string());
        DedupOutcome {
            action: DedupAction::MergeExisting,
            merged_with: Some(existing.id),
        }
    }

    /// Runs `check_and_merge` over a batch, additionally collapsing exact
    /// text repeats inside the batch itself (first occurrence wins).
    pub async fn deduplicate_batch(&self, facts: Vec<EpisodicFact>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut batch_texts: HashSet<String> = HashSet::new();

        for fact in facts {
            if !batch_texts.insert(fact.text.clone()) {
                outcome.merged_count += 1;
                continue;
            }
            match self.check_and_merge(&fact).await {
                DedupOutcome {
                    action: DedupAction::WriteNew,
                    ..
                } => outcome.to_write.push(fact),
                _ => outcome.merged_count += 1,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockVectorIndex;
    use engram_core::traits::VectorIndexAdapter;
    use engram_core::types::IndexRecord;

    fn fact(text: &str, session: &str) -> EpisodicFact {
        EpisodicFact::new(
            text.to_string(),
            session.to_string(),
            vec!["test".to_string()],
            0.3,
            30,
        )
    }

    fn engine(index: Arc<MockVectorIndex>) -> DedupEngine {
        DedupEngine::new(index, DedupConfig::default(), Arc::new(EngineTelemetry::new()))
    }

    #[tokio::test]
    async fn test_low_similarity_writes_new() {
        let index = Arc::new(MockVectorIndex::new());
        let existing = fact("the deploy failed on tuesday", "s1");
        index
            .upsert(vec![IndexRecord::from_fact(&existing)])
            .await
            .unwrap();
        index.set_similarity(&existing.id, 0.3).await;

        let outcome = engine(index).check_and_merge(&fact("coffee is in aisle four", "s1")).await;
        assert_eq!(outcome.action, DedupAction::WriteNew);
        assert!(outcome.merged_with.is_none());
    }

    #[tokio::test]
    async fn test_high_similarity_merges() {
        let index = Arc::new(MockVectorIndex::new());
        let existing = fact("the deploy failed on tuesday", "s1");
        let original_ttl = existing.ttl_at;
        index
            .upsert(vec![IndexRecord::from_fact(&existing)])
            .await
            .unwrap();
        index.set_similarity(&existing.id, 0.95).await;

        let outcome = engine(index.clone())
            .check_and_merge(&fact("tuesday's deploy failed", "s1"))
            .await;
        assert_eq!(outcome.action, DedupAction::MergeExisting);
        assert_eq!(outcome.merged_with.as_deref(), Some(existing.id.as_str()));

        let hit = index.get(&existing.id).await.unwrap().unwrap();
        let merged = EpisodicFact::from_hit(&hit).unwrap();
        assert!((merged.salience - 0.4).abs() < 1e-6);
        assert!(merged.ttl_at > original_ttl);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let index = Arc::new(MockVectorIndex::new());
        let at = fact("threshold fact", "s1");
        index.upsert(vec![IndexRecord::from_fact(&at)]).await.unwrap();
        index.set_similarity(&at.id, 0.92).await;
        let outcome = engine(index.clone()).check_and_merge(&fact("near twin", "s1")).await;
        assert_eq!(outcome.action, DedupAction::MergeExisting);

        index.set_similarity(&at.id, 0.9199).await;
        let outcome = engine(index).check_and_merge(&fact("almost twin", "s1")).await;
        assert_eq!(outcome.action, DedupAction::WriteNew);
    }

    #[tokio::test]
    async fn test_dedup_is_session_scoped() {
        let index = Arc::new(MockVectorIndex::new());
        let other_session = fact("the deploy failed on tuesday", "s2");
        index
            .upsert(vec![IndexRecord::from_fact(&other_session)])
            .await
            .unwrap();
        index.set_similarity(&other_session.id, 0.99).await;

        let outcome = engine(index)
            .check_and_merge(&fact("the deploy failed on tuesday again", "s1"))
            .await;
        assert_eq!(outcome.action, DedupAction::WriteNew);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_write() {
        let index = Arc::new(MockVectorIndex::new());
        let outcome = engine(index)
            .check_and_merge(&fact("TRIGGER_FAILURE lookup", "s1"))
            .await;
        assert_eq!(outcome.action, DedupAction::WriteNew);
    }

    #[tokio::test]
    async fn test_batch_collapses_exact_repeats() {
        let index = Arc::new(MockVectorIndex::new());
        let batch = vec![
            fact("the user prefers dark mode", "s1"),
            fact("the user prefers dark mode", "s1"),
            fact("the deploy failed on tuesday", "s1"),
        ];

        let outcome = engine(index).deduplicate_batch(batch).await;
        assert_eq!(outcome.to_write.len(), 2);
        assert_eq!(outcome.merged_count, 1);
    }
}
