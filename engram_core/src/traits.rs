//! Trait seams for the engine's external collaborators.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::{IndexRecord, SearchHit};

/// A vector-similarity store holding one memory tier.
///
/// The engine never embeds text itself; adapters receive raw text and are
/// responsible for embedding on their side of the seam.
#[async_trait]
pub trait VectorIndexAdapter: Send + Sync {
    type Error;

    /// Nearest-neighbor query, optionally restricted by metadata equality
    /// filters (array-valued filter fields match on containment).
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<SearchHit>, Self::Error>;

    /// Writes records, overwriting any with the same id. Returns the ids in
    /// input order.
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<Vec<String>, Self::Error>;

    async fn get(&self, id: &str) -> Result<Option<SearchHit>, Self::Error>;

    /// Replaces the metadata of an existing record, leaving its text (and
    /// therefore its embedding) untouched.
    async fn update_metadata(
        &self,
        id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), Self::Error>;

    async fn delete(&self, id: &str) -> Result<(), Self::Error>;

    /// Non-semantic scan over the index, filtered by metadata equality.
    /// Used by maintenance jobs (promotion scans, TTL cleanup).
    async fn scroll(
        &self,
        filter: HashMap<String, serde_json::Value>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, Self::Error>;
}

/// A language-model completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    type Error;

    async fn complete(&self, prompt: &str) -> Result<String, Self::Error>;
}

/// A secondary relevance-scoring pass over recall candidates.
#[async_trait]
pub trait Reranker: Send + Sync {
    type Error;

    /// Returns the indices of `candidates` in descending relevance to
    /// `query`. Implementations may drop indices; callers treat missing
    /// ones as ranked below all returned ones.
    async fn rerank(&self, query: &str, candidates: &[String])
    -> Result<Vec<usize>, Self::Error>;
}
