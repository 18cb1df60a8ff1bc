use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use uuid::Uuid;

const SECONDS_PER_DAY: i64 = 86_400;

/// Clamps a salience score into the valid `[0, 1]` range.
pub fn clamp_salience(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// The two durable memory tiers. Working memory is per-session and
/// short-lived, so it never appears in persisted metadata.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MemoryTier {
    Episodic,
    Semantic,
}

/// Caller-declared intent for a recall request. Fact-checking recalls only
/// accept verified semantic documents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RecallIntent {
    #[default]
    General,
    FactCheck,
    Task,
}

impl RecallIntent {
    /// Whether this intent restricts the semantic tier to verified documents.
    #[must_use]
    pub fn requires_verified(&self) -> bool {
        matches!(self, RecallIntent::FactCheck)
    }
}

/// How an episodic fact came to exist.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FactType {
    #[default]
    Distilled,
    Promoted,
}

/// Origin of a semantic document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SourceType {
    Promotion,
    Ingestion,
}

/// A single conversational turn held in working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingMemoryTurn {
    pub session_id: String,
    pub turn_number: u64,
    pub user_message: String,
    pub assistant_message: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: i64,
}

impl WorkingMemoryTurn {
    pub fn new(
        session_id: impl Into<String>,
        turn_number: u64,
        user_message: impl Into<String>,
        assistant_message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            turn_number,
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
            metadata: HashMap::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A distilled, session-scoped fact in the episodic tier.
///
/// Salience and citation count are mutated by the salience tracker, the TTL
/// by the deduplication engine. Promotion copies the fact into the semantic
/// tier but never deletes the original; TTL cleanup removes it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicFact {
    pub id: String,
    pub text: String,
    pub session_id: String,
    pub entity_tags: Vec<String>,
    pub salience: f32,
    pub citation_count: u32,
    pub created_at: i64,
    pub last_seen_at: i64,
    pub ttl_at: i64,
    pub verified: bool,
    pub fact_type: FactType,
}

impl EpisodicFact {
    pub fn new(
        text: impl Into<String>,
        session_id: impl Into<String>,
        entity_tags: Vec<String>,
        initial_salience: f32,
        ttl_days: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: format!("fact_{}", Uuid::new_v4()),
            text: text.into(),
            session_id: session_id.into(),
            entity_tags,
            salience: clamp_salience(initial_salience),
            citation_count: 0,
            created_at: now,
            last_seen_at: now,
            ttl_at: now + ttl_days * SECONDS_PER_DAY,
            verified: false,
            fact_type: FactType::Distilled,
        }
    }

    /// Adds `amount` to the salience score, clamped into `[0, 1]`.
    pub fn bump_salience(&mut self, amount: f32) {
        self.salience = clamp_salience(self.salience + amount);
    }

    /// Extends the TTL by `days` from its current value. The expiry only
    /// ever moves forward: a non-positive extension is a no-op.
    pub fn extend_ttl_days(&mut self, days: i64) {
        let candidate = self.ttl_at + days * SECONDS_PER_DAY;
        if candidate > self.ttl_at {
            self.ttl_at = candidate;
        }
    }

    /// Age of the fact in fractional days at `now`.
    #[must_use]
    pub fn age_days(&self, now: i64) -> f64 {
        ((now - self.created_at).max(0) as f64) / SECONDS_PER_DAY as f64
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.ttl_at
    }

    /// Refreshes the last-seen timestamp.
    pub fn touch(&mut self, now: i64) {
        self.last_seen_at = now;
    }

    /// Metadata map persisted alongside the fact text in the vector index.
    pub fn to_metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        metadata.insert("tier".to_string(), serde_json::json!(MemoryTier::Episodic));
        metadata.insert("sessionId".to_string(), serde_json::json!(self.session_id));
        metadata.insert(
            "entityTags".to_string(),
            serde_json::json!(self.entity_tags),
        );
        metadata.insert("salience".to_string(), serde_json::json!(self.salience));
        metadata.insert(
            "citationCount".to_string(),
            serde_json::json!(self.citation_count),
        );
        metadata.insert("createdAt".to_string(), serde_json::json!(self.created_at));
        metadata.insert(
            "lastSeenAt".to_string(),
            serde_json::json!(self.last_seen_at),
        );
        metadata.insert("ttlAt".to_string(), serde_json::json!(self.ttl_at));
        metadata.insert("verified".to_string(), serde_json::json!(self.verified));
        metadata.insert("factType".to_string(), serde_json::json!(self.fact_type));
        metadata
    }

    /// Rebuilds a fact from an index hit. Returns `None` when required
    /// fields are missing, which signals a record written by something
    /// other than this engine.
    #[must_use]
    pub fn from_hit(hit: &SearchHit) -> Option<Self> {
        let session_id = hit.metadata.get("sessionId")?.as_str()?.to_string();
        let created_at = hit.metadata.get("createdAt")?.as_i64()?;
        let ttl_at = hit.metadata.get("ttlAt")?.as_i64()?;
        let entity_tags = hit
            .metadata
            .get("entityTags")
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let fact_type = hit
            .metadata
            .get("factType")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        Some(Self {
            id: hit.id.clone(),
            text: hit.text.clone(),
            session_id,
            entity_tags,
            salience: clamp_salience(
                hit.metadata
                    .get("salience")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0) as f32,
            ),
            citation_count: hit
                .metadata
                .get("citationCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            created_at,
            last_seen_at: hit
                .metadata
                .get("lastSeenAt")
                .and_then(|v| v.as_i64())
                .unwrap_or(created_at),
            ttl_at,
            verified: hit
                .metadata
                .get("verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            fact_type,
        })
    }
}

/// Provenance of a semantic document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source_type: SourceType,
    pub original_session: Option<String>,
    pub promoted_at: i64,
}

/// A durable, cross-session knowledge document in the semantic tier.
///
/// The text is immutable once written; salience and the verified flag stay
/// mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticDocument {
    pub id: String,
    pub text: String,
    pub entity_tags: Vec<String>,
    pub salience: f32,
    pub verified: bool,
    pub provenance: Provenance,
}

impl SemanticDocument {
    /// Builds the semantic copy of a promoted episodic fact.
    ///
    /// The document id is derived deterministically from the source fact id
    /// so that re-running a promotion cycle upserts the same document
    /// instead of creating a duplicate.
    #[must_use]
    pub fn from_promotion(fact: &EpisodicFact, now: i64) -> Self {
        let id = format!(
            "sem_{}",
            Uuid::new_v5(&Uuid::NAMESPACE_OID, fact.id.as_bytes())
        );
        Self {
            id,
            text: fact.text.clone(),
            entity_tags: fact.entity_tags.clone(),
            salience: clamp_salience(fact.salience),
            verified: true,
            provenance: Provenance {
                source_type: SourceType::Promotion,
                original_session: Some(fact.session_id.clone()),
                promoted_at: now,
            },
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        metadata.insert("tier".to_string(), serde_json::json!(MemoryTier::Semantic));
        metadata.insert(
            "entityTags".to_string(),
            serde_json::json!(self.entity_tags),
        );
        metadata.insert("salience".to_string(), serde_json::json!(self.salience));
        metadata.insert("verified".to_string(), serde_json::json!(self.verified));
        metadata.insert(
            "provenance".to_string(),
            serde_json::json!(self.provenance),
        );
        metadata
    }

    #[must_use]
    pub fn from_hit(hit: &SearchHit) -> Option<Self> {
        let provenance = hit
            .metadata
            .get("provenance")
            .and_then(|v| serde_json::from_value(v.clone()).ok())?;
        let entity_tags = hit
            .metadata
            .get("entityTags")
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id: hit.id.clone(),
            text: hit.text.clone(),
            entity_tags,
            salience: clamp_salience(
                hit.metadata
                    .get("salience")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0) as f32,
            ),
            verified: hit
                .metadata
                .get("verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            provenance,
        })
    }
}

/// One nearest-neighbor result from a vector index query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub score: f32,
}

/// A record to write (or overwrite) in a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl IndexRecord {
    #[must_use]
    pub fn from_fact(fact: &EpisodicFact) -> Self {
        Self {
            id: fact.id.clone(),
            text: fact.text.clone(),
            metadata: fact.to_metadata(),
        }
    }

    #[must_use]
    pub fn from_document(doc: &SemanticDocument) -> Self {
        Self {
            id: doc.id.clone(),
            text: doc.text.clone(),
            metadata: doc.to_metadata(),
        }
    }
}
