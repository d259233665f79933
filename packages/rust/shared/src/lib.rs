//! Shared types, error model, and configuration for Coursesmith.
//!
//! This crate is the foundation depended on by all other Coursesmith crates.
//! It provides:
//! - [`CoursesmithError`]: the unified error type
//! - Domain types ([`CourseOutline`], [`TopicDetail`], [`TopicRef`], [`Stage`], [`Tier`])
//! - Configuration ([`AppConfig`], [`OrchestratorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CohereConfig, OrchestratorConfig, OutlineConfig, OutlineShape, PacingConfig,
    QueueConfig, StorageConfig, api_key, config_dir, config_file_path, database_path,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{CoursesmithError, Result, TransportKind};
pub use types::{
    CourseId, CourseOutline, DEFAULT_COURSE_TITLE, DEFAULT_MODULE_TITLE, GenerationStatus, Mcq,
    Module, NORMAL_WEIGHT, PRIORITY_WEIGHT, Stage, Tier, TopicContent, TopicDetail, TopicRef,
    canonical_title, normalize_identifier,
};
