//! Shared types, error model, and configuration for VaultZero.
//!
//! This crate is the foundation depended on by all other VaultZero crates.
//! It provides:
//! - [`VaultZeroError`], the unified error type
//! - Domain types ([`Pillar`], [`PillarScore`], [`ComplianceMapping`], [`PeerAssessment`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnthropicConfig, AppConfig, BenchmarkConfig, DefaultsConfig, FeedsConfig, PipelineConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_api_key, validate_config,
};
pub use error::{Result, VaultZeroError};
pub use types::{
    ComplianceMapping, MAX_SCORE, MaturityLevel, PeerAssessment, PeerPillar, Pillar, PillarScore,
    QaPair, RunId, RunMeta, clamp_score, mean_score, percentage,
};
