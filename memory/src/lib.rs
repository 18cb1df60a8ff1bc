//! # Engram Memory Engine
//!
//! Tiered memory for long-running conversational agents: per-session working
//! memory, TTL'd episodic facts, and durable semantic knowledge, plus the
//! maintenance machinery (salience tracking, dedup-merge, promotion,
//! scheduled cleanup) and a resilience wrapper for unreliable external
//! dependencies.

pub mod dedup;
pub mod distill;
pub mod engine;
pub mod error;
pub mod promotion;
pub mod providers;
pub mod recall;
pub mod resilience;
pub mod salience;
pub mod scheduler;
pub mod telemetry;
pub mod working;

pub use engine::MemoryEngine;
pub use error::{MemoryError, MemoryResult};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type DynVectorIndex =
    std::sync::Arc<dyn engram_core::traits::VectorIndexAdapter<Error = BoxError> + Send + Sync>;
pub type DynCompletion =
    std::sync::Arc<dyn engram_core::traits::CompletionService<Error = BoxError> + Send + Sync>;
pub type DynReranker =
    std::sync::Arc<dyn engram_core::traits::Reranker<Error = BoxError> + Send + Sync>;
