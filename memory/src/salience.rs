use crate::DynVectorIndex;
use crate::telemetry::EngineTelemetry;
use config::SalienceConfig;
use engram_core::types::{EpisodicFact, SemanticDocument};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
struct PendingUpdate {
    salience_delta: f32,
    citations: u32,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

/// Accumulates salience signals in memory and applies them to the index in
/// batches.
///
/// Retrieval bumps salience by the usage increment; an explicit citation
/// bumps it by the larger citation increment and also counts toward the
/// fact's citation total. Updates are held in a pending map keyed by record
/// id; the map flushes when it reaches the configured batch size or when the
/// scheduler triggers a flush. Pending increments that have not been flushed
/// are lost on crash; flushed state is never lost.
pub struct SalienceTracker {
    index: DynVectorIndex,
    config: SalienceConfig,
    pending: Mutex<HashMap<String, PendingUpdate>>,
    telemetry: Arc<EngineTelemetry>,
}

impl SalienceTracker {
    pub fn new(index: DynVectorIndex, config: SalienceConfig, telemetry: Arc<EngineTelemetry>) -> Self {
        Self {
            index,
            config,
            pending: Mutex::new(HashMap::new()),
            telemetry,
        }
    }

    /// Records a passive retrieval of each id.
    pub async fn track_usage(&self, ids: &[String]) -> FlushReport {
        self.track(ids, self.config.usage_increment, 0).await
    }

    /// Records that the agent explicitly cited each id in a response.
    pub async fn track_citations(&self, ids: &[String]) -> FlushReport {
        self.track(ids, self.config.citation_increment, 1).await
    }

    /// Records a single retrieval with a caller-chosen increment instead of
    /// the configured usage increment.
    pub async fn track_increment(&self, id: &str, increment: f32) -> FlushReport {
        let ids = [id.to_string()];
        self.track(&ids, increment, 0).await
    }

    async fn track(&self, ids: &[String], increment: f32, citations: u32) -> FlushReport {
        let should_flush = {
            let mut pending = self.pending.lock().await;
            for id in ids {
                let entry = pending.entry(id.clone()).or_default();
                entry.salience_delta += increment;
                entry.citations += citations;
            }
            self.telemetry.record_salience_pending(pending.len());
            pending.len() >= self.config.flush_batch_size
        };

        if should_flush {
            self.flush().await
        } else {
            FlushReport::default()
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Applies all pending updates to the index. A failure on one id
    /// re-queues that id's increments and does not affect the others.
    pub async fn flush(&self) -> FlushReport {
        let drained: HashMap<String, PendingUpdate> = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };

        if drained.is_empty() {
            return FlushReport::default();
        }

        let mut report = FlushReport::default();
        for (id, update) in drained {
            match self.apply(&id, update).await {
                Ok(()) => report.flushed += 1,
                Err(err) => {
                    warn!(id = %id, error = %err, "Salience flush failed for record, re-queueing");
                    report.failed += 1;
                    let mut pending = self.pending.lock().await;
                    let entry = pending.entry(id).or_default();
                    entry.salience_delta += update.salience_delta;
                    entry.citations += update.citations;
                }
            }
        }

        debug!(flushed = report.flushed, failed = report.failed, "Salience flush complete");
        self.telemetry.record_salience_flush(report.flushed, report.failed);
        self.telemetry
            .record_salience_pending(self.pending.lock().await.len());
        report
    }

    async fn apply(&self, id: &str, update: PendingUpdate) -> Result<(), crate::BoxError> {
        let hit = self
            .index
            .get(id)
            .await?
            .ok_or_else(|| format!("Record {id} no longer exists"))?;

        let now = chrono::Utc::now().timestamp();
        let metadata = if let Some(mut fact) = EpisodicFact::from_hit(&hit) {
            fact.bump_salience(update.salience_delta);
            fact.citation_count += update.citations;
            fact.touch(now);
            fact.to_metadata()
        } else if let Some(mut doc) = SemanticDocument::from_hit(&hit) {
            doc.salience = engram_core::clamp_salience(doc.salience + update.salience_delta);
            doc.to_metadata()
        } else {
            return Err(format!("Record {id} has unreadable metadata").into());
        };

        self.index.update_metadata(id, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockVectorIndex;
    use engram_core::traits::VectorIndexAdapter;
    use engram_core::types::IndexRecord;

    fn fact(text: &str) -> EpisodicFact {
        EpisodicFact::new(text.to_string(), "s1".to_string(), vec![], 0.3, 30)
    }

    fn tracker(index: Arc<MockVectorIndex>, flush_batch_size: usize) -> SalienceTracker {
        SalienceTracker::new(
            index,
            SalienceConfig {
                flush_batch_size,
                ..SalienceConfig::default()
            },
            Arc::new(EngineTelemetry::new()),
        )
    }

    #[tokio::test]
    async fn test_usage_accumulates_until_flush() {
        let index = Arc::new(MockVectorIndex::new());
        let f = fact("deploys happen on fridays");
        index.upsert(vec![IndexRecord::from_fact(&f)]).await.unwrap();

        let tracker = tracker(index.clone(), 100);
        tracker.track_usage(&[f.id.clone()]).await;
        tracker.track_usage(&[f.id.clone()]).await;
        assert_eq!(tracker.pending_count().await, 1);

        // Not yet visible in the index.
        let hit = index.get(&f.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!((stored.salience - 0.3).abs() < 1e-6);

        let report = tracker.flush().await;
        assert_eq!(report, FlushReport { flushed: 1, failed: 0 });

        let hit = index.get(&f.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!((stored.salience - 0.4).abs() < 1e-6);
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_citation_increments_count_and_salience() {
        let index = Arc::new(MockVectorIndex::new());
        let f = fact("the user is named robin");
        index.upsert(vec![IndexRecord::from_fact(&f)]).await.unwrap();

        let tracker = tracker(index.clone(), 100);
        tracker.track_citations(&[f.id.clone()]).await;
        tracker.track_citations(&[f.id.clone()]).await;
        tracker.flush().await;

        let hit = index.get(&f.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert_eq!(stored.citation_count, 2);
        assert!((stored.salience - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_explicit_increment() {
        let index = Arc::new(MockVectorIndex::new());
        let f = fact("pinned fact");
        index.upsert(vec![IndexRecord::from_fact(&f)]).await.unwrap();

        let tracker = tracker(index.clone(), 100);
        tracker.track_increment(&f.id, 0.25).await;
        tracker.flush().await;

        let hit = index.get(&f.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!((stored.salience - 0.55).abs() < 1e-6);
        assert_eq!(stored.citation_count, 0);
    }

    #[tokio::test]
    async fn test_salience_clamped_at_one() {
        let index = Arc::new(MockVectorIndex::new());
        let f = fact("heavily cited fact");
        index.upsert(vec![IndexRecord::from_fact(&f)]).await.unwrap();

        let tracker = tracker(index.clone(), 100);
        let ids = vec![f.id.clone()];
        for _ in 0..10 {
            tracker.track_citations(&ids).await;
        }
        tracker.flush().await;

        let hit = index.get(&f.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!(stored.salience <= 1.0);
        assert!((stored.salience - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_auto_flush_at_batch_size() {
        let index = Arc::new(MockVectorIndex::new());
        let f1 = fact("fact one");
        let f2 = fact("fact two");
        index
            .upsert(vec![IndexRecord::from_fact(&f1), IndexRecord::from_fact(&f2)])
            .await
            .unwrap();

        let tracker = tracker(index, 2);
        let report = tracker.track_usage(&[f1.id.clone(), f2.id.clone()]).await;
        assert_eq!(report.flushed, 2);
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_flush_failure_is_isolated_and_requeued() {
        let index = Arc::new(MockVectorIndex::new());
        let good = fact("good fact");
        index.upsert(vec![IndexRecord::from_fact(&good)]).await.unwrap();

        let tracker = tracker(index.clone(), 100);
        tracker
            .track_usage(&[good.id.clone(), "fact_TRIGGER_FAILURE".to_string()])
            .await;

        let report = tracker.flush().await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.failed, 1);
        // The failed id keeps its increment for the next flush.
        assert_eq!(tracker.pending_count().await, 1);

        let hit = index.get(&good.id).await.unwrap().unwrap();
        let stored = EpisodicFact::from_hit(&hit).unwrap();
        assert!((stored.salience - 0.35).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let index = Arc::new(MockVectorIndex::new());
        let tracker = tracker(index, 100);
        assert_eq!(tracker.flush().await, FlushReport::default());
    }
}
