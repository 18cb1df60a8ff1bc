//! # Configuration System
//!
//! Centralized configuration management for the Engram memory engine.
//!
//! This crate provides:
//! - Configuration structures for all engine components
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML/YAML)
//! - Configuration validation

pub mod config;
pub mod file_loader;

pub use config::{
    Config, DedupConfig, DistillationConfig, ObservabilityConfig, PromotionConfig, RecallConfig,
    ResilienceConfig, SalienceConfig, SchedulerConfig, WorkingMemoryConfig,
};
pub use file_loader::{load_from_file, load_from_toml, load_from_yaml};
pub use validator::Validate;
