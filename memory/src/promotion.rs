use crate::error::{MemoryError, MemoryResult};
use crate::telemetry::EngineTelemetry;
use crate::DynVectorIndex;
use config::PromotionConfig;
use engram_core::types::{EpisodicFact, FactType, IndexRecord, MemoryTier, SemanticDocument};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Success,
    NoPromotions,
    Error,
}

#[derive(Debug)]
pub struct CycleReport {
    pub found: usize,
    pub promoted: usize,
    pub failed: usize,
    pub status: CycleStatus,
}

/// Promotes episodic facts that have proven durable into the semantic tier.
///
/// Promotion is additive: the semantic copy is written but the episodic
/// original stays in place until its TTL expires. The semantic document id
/// is derived from the fact id, so re-promoting the same fact overwrites
/// the same document rather than duplicating it. Criteria are fixed at
/// construction and hold for the process lifetime.
pub struct PromotionEngine {
    index: DynVectorIndex,
    config: PromotionConfig,
    telemetry: Arc<EngineTelemetry>,
}

impl PromotionEngine {
    pub fn new(index: DynVectorIndex, config: PromotionConfig, telemetry: Arc<EngineTelemetry>) -> Self {
        Self {
            index,
            config,
            telemetry,
        }
    }

    /// All promotion criteria must hold at once.
    pub fn should_promote(&self, fact: &EpisodicFact, now: i64) -> bool {
        if fact.fact_type == FactType::Promoted {
            return false;
        }
        if fact.is_expired(now) {
            return false;
        }
        if self.config.require_verified && !fact.verified {
            return false;
        }
        fact.salience >= self.config.salience_threshold
            && fact.citation_count >= self.config.min_citation_count
            && fact.age_days(now) >= self.config.min_age_days
    }

    /// Scans the episodic tier for facts meeting every criterion.
    pub async fn find_promotable(&self) -> MemoryResult<Vec<EpisodicFact>> {
        let mut filter = HashMap::new();
        filter.insert("tier".to_string(), serde_json::json!(MemoryTier::Episodic));

        let hits = self
            .index
            .scroll(filter, self.config.scan_limit)
            .await
            .map_err(|err| MemoryError::IndexError(err.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        Ok(hits
            .iter()
            .filter_map(EpisodicFact::from_hit)
            .filter(|fact| self.should_promote(fact, now))
            .collect())
    }

    /// Writes the semantic copy of one fact and marks the episodic original
    /// as promoted. Returns the semantic document id.
    pub async fn promote(&self, fact: &EpisodicFact) -> MemoryResult<String> {
        let now = chrono::Utc::now().timestamp();
        let doc = SemanticDocument::from_promotion(fact, now);

        self.index
            .upsert(vec![IndexRecord::from_document(&doc)])
            .await
            .map_err(|err| MemoryError::IndexError(err.to_string()))?;

        // The episodic original stays until TTL; it is only flagged so the
        // next scan skips it. A failure here is harmless because promotion
        // is idempotent.
        let mut promoted_fact = fact.clone();
        promoted_fact.fact_type = FactType::Promoted;
        if let Err(err) = self
            .index
            .update_metadata(&fact.id, promoted_fact.to_metadata())
            .await
        {
            warn!(id = %fact.id, error = %err, "Could not flag episodic fact as promoted");
        }

        debug!(fact = %fact.id, document = %doc.id, "Promoted fact to semantic tier");
        Ok(doc.id)
    }

    /// One full promotion pass. Individual promotion failures are counted
    /// and logged without aborting the cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let candidates = match self.find_promotable().await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "Promotion scan failed");
                self.telemetry.record_promotion_cycle(0, 0, 0);
                return CycleReport {
                    found: 0,
                    promoted: 0,
                    failed: 0,
                    status: CycleStatus::Error,
                };
            }
        };

        let found = candidates.len();
        let mut promoted = 0;
        let mut failed = 0;
        for fact in &candidates {
            match self.promote(fact).await {
                Ok(_) => promoted += 1,
                Err(err) => {
                    warn!(id = %fact.id, error = %err, "Promotion failed for fact");
                    failed += 1;
                }
            }
        }

        let status = if failed > 0 && promoted == 0 && found > 0 {
            CycleStatus::Error
        } else if promoted == 0 {
            CycleStatus::NoPromotions
        } else {
            CycleStatus::Success
        };

        if found > 0 {
            info!(found, promoted, failed, "Promotion cycle complete");
        }
        self.telemetry.record_promotion_cycle(found, promoted, failed);
        CycleReport {
            found,
            promoted,
            failed,
            status,
        }
    }

    /// Deletes episodic facts whose TTL has passed. Returns the number
    /// removed.
    pub async fn cleanup_expired(&self) -> MemoryResult<usize> {
        let mut filter = HashMap::new();
        filter.insert("tier".to_string(), serde_json::json!(MemoryTier::Episodic));

        let hits = self
            .index
            .scroll(filter, self.config.scan_limit)
            .await
            .map_err(|err| MemoryError::IndexError(err.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let mut removed = 0;
        for hit in &hits {
            let Some(fact) = EpisodicFact::from_hit(hit) else {
                continue;
            };
            if !fact.is_expired(now) {
                continue;
            }
            match self.index.delete(&fact.id).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(id = %fact.id, error = %err, "Could not delete expired fact");
                }
            }
        }

        if removed > 0 {
            info!(removed, "Expired episodic facts removed");
        }
        self.telemetry.record_ttl_cleanup(removed);
        Ok(removed)
    }
}
