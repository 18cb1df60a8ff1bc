//! # Engram Core
//!
//! Shared types and traits for the Engram tiered memory engine.
//!
//! This crate provides:
//! - The data model for the three memory tiers (working, episodic, semantic)
//! - Trait seams for the external collaborators (vector index, completion
//!   service, reranker)
//! - Invariant helpers (salience clamping, monotonic TTL extension)

pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    EpisodicFact, FactType, MemoryTier, Provenance, RecallIntent, SearchHit, SemanticDocument,
    SourceType, WorkingMemoryTurn, clamp_salience,
};
