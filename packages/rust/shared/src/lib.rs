//! Shared types, error model, and configuration for Quarry.
//!
//! This crate is the foundation depended on by all other Quarry crates.
//! It provides:
//! - [`QuarryError`]: the unified error type
//! - Domain types ([`DocumentSummary`], [`AggregatedDocument`], [`ExtractedFact`], [`RefinedFactSet`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)
//! - Character-budget string helpers ([`text`])

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchSettings, LlmSettings, PipelineConfig, PipelineSettings, SearchSettings,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{QuarryError, Result};
pub use types::{
    AggregatedDocument, DEFAULT_BUDGET, DocumentSummary, ExtractedFact, PlannedQuery,
    RefinedFactSet,
};
