use async_trait::async_trait;
use engram_core::traits::{CompletionService, Reranker, VectorIndexAdapter};
use engram_core::types::{IndexRecord, SearchHit};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::BoxError;

/// In-memory vector index used by tests and local development.
///
/// Similarity is injected per record id through `set_similarity` so that
/// threshold behavior is deterministic; a record whose text equals the query
/// scores 1.0. Queries or record ids containing `TRIGGER_FAILURE` fail, to
/// simulate an unavailable backend.
pub struct MockVectorIndex {
    records: Arc<RwLock<HashMap<String, IndexRecord>>>,
    scores: Arc<RwLock<HashMap<String, f32>>>,
}

impl MockVectorIndex {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            scores: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sets the similarity score this index reports for `id` on every query.
    pub async fn set_similarity(&self, id: &str, score: f32) {
        let mut scores = self.scores.write().await;
        scores.insert(id.to_string(), score);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn matches_filter(record: &IndexRecord, filter: &HashMap<String, serde_json::Value>) -> bool {
        for (key, expected) in filter {
            match (record.metadata.get(key), expected) {
                // Array filter against array field matches on any overlap
                (Some(serde_json::Value::Array(values)), serde_json::Value::Array(wanted)) => {
                    if !wanted.iter().any(|w| values.contains(w)) {
                        return false;
                    }
                }
                // Scalar filter against array field matches on containment
                (Some(serde_json::Value::Array(values)), scalar) => {
                    if !values.contains(scalar) {
                        return false;
                    }
                }
                (Some(actual), _) => {
                    if actual != expected {
                        return false;
                    }
                }
                (None, _) => return false,
            }
        }
        true
    }
}

impl Default for MockVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndexAdapter for MockVectorIndex {
    type Error = BoxError;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<SearchHit>, Self::Error> {
        if query.contains("TRIGGER_FAILURE") {
            return Err("Simulated index failure".into());
        }

        let records = self.records.read().await;
        let scores = self.scores.read().await;

        let mut hits: Vec<SearchHit> = records
            .values()
            .filter(|record| Self::matches_filter(record, &filter))
            .map(|record| {
                let score = if record.text == query {
                    1.0
                } else {
                    scores.get(&record.id).copied().unwrap_or(0.0)
                };
                SearchHit {
                    id: record.id.clone(),
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn upsert(&self, batch: Vec<IndexRecord>) -> Result<Vec<String>, Self::Error> {
        let mut records = self.records.write().await;
        let mut ids = Vec::with_capacity(batch.len());
        for record in batch {
            if record.id.contains("TRIGGER_FAILURE") {
                return Err("Simulated upsert failure".into());
            }
            ids.push(record.id.clone());
            records.insert(record.id.clone(), record);
        }
        Ok(ids)
    }

    async fn get(&self, id: &str) -> Result<Option<SearchHit>, Self::Error> {
        if id.contains("TRIGGER_FAILURE") {
            return Err("Simulated get failure".into());
        }
        let records = self.records.read().await;
        Ok(records.get(id).map(|record| SearchHit {
            id: record.id.clone(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            score: 1.0,
        }))
    }

    async fn update_metadata(
        &self,
        id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), Self::Error> {
        if id.contains("TRIGGER_FAILURE") {
            return Err("Simulated update failure".into());
        }
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.metadata = metadata;
                Ok(())
            }
            None => Err("Record not found".into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), Self::Error> {
        let mut records = self.records.write().await;
        records.remove(id);
        Ok(())
    }

    async fn scroll(
        &self,
        filter: HashMap<String, serde_json::Value>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, Self::Error> {
        let records = self.records.read().await;
        let mut hits: Vec<SearchHit> = records
            .values()
            .filter(|record| Self::matches_filter(record, &filter))
            .map(|record| SearchHit {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score: 1.0,
            })
            .collect();

        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Completion service returning canned responses in order, then repeating
/// the last one. An empty queue fails every call.
pub struct MockCompletion {
    responses: Arc<RwLock<Vec<String>>>,
}

impl MockCompletion {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(RwLock::new(responses)),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    type Error = BoxError;

    async fn complete(&self, prompt: &str) -> Result<String, Self::Error> {
        if prompt.contains("TRIGGER_FAILURE") {
            return Err("Simulated completion failure".into());
        }
        let mut responses = self.responses.write().await;
        if responses.is_empty() {
            return Err("No completion configured".into());
        }
        if responses.len() == 1 {
            return Ok(responses[0].clone());
        }
        Ok(responses.remove(0))
    }
}

/// Reranker that orders candidates by descending length, which is easy to
/// predict in tests. Queries containing `TRIGGER_FAILURE` fail.
pub struct MockReranker;

#[async_trait]
impl Reranker for MockReranker {
    type Error = BoxError;

    async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
    ) -> Result<Vec<usize>, Self::Error> {
        if query.contains("TRIGGER_FAILURE") {
            return Err("Simulated rerank failure".into());
        }
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|a, b| {
            candidates[*b]
                .len()
                .cmp(&candidates[*a].len())
                .then_with(|| a.cmp(b))
        });
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str, session: &str) -> IndexRecord {
        let mut metadata = HashMap::new();
        metadata.insert("sessionId".to_string(), serde_json::json!(session));
        IndexRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_mock_index_basic_ops() {
        let index = MockVectorIndex::new();
        index
            .upsert(vec![record("r1", "hello world", "s1")])
            .await
            .unwrap();

        let hit = index.get("r1").await.unwrap().unwrap();
        assert_eq!(hit.text, "hello world");

        index.delete("r1").await.unwrap();
        assert!(index.get("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_index_scored_search() {
        let index = MockVectorIndex::new();
        index
            .upsert(vec![
                record("r1", "alpha", "s1"),
                record("r2", "beta", "s1"),
                record("r3", "gamma", "s2"),
            ])
            .await
            .unwrap();
        index.set_similarity("r1", 0.95).await;
        index.set_similarity("r2", 0.5).await;
        index.set_similarity("r3", 0.99).await;

        let mut filter = HashMap::new();
        filter.insert("sessionId".to_string(), serde_json::json!("s1"));

        let hits = index.similarity_search("query", 10, filter).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "r1");
        assert_eq!(hits[1].id, "r2");
    }

    #[tokio::test]
    async fn test_mock_index_failure_convention() {
        let index = MockVectorIndex::new();
        let result = index
            .similarity_search("TRIGGER_FAILURE query", 5, HashMap::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_reranker_orders_by_length() {
        let reranker = MockReranker;
        let candidates = vec!["bb".to_string(), "a".to_string(), "cccc".to_string()];
        let order = reranker.rerank("q", &candidates).await.unwrap();
        assert_eq!(order, vec![2, 0, 1]);
    }
}
