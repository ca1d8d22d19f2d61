//! Shared types, error model, file type registry, and configuration for iatigen.
//!
//! This crate is the foundation depended on by all other iatigen crates.
//! It provides:
//! - [`IatiError`], the unified error type
//! - The file type catalog ([`FileType`], [`Domain`], [`registry::resolve`])
//! - Domain types ([`Namespace`], [`TrackingRecord`], [`AttemptOutcome`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConverterConfig, HostConfig, HttpConfig, PipelineConfig, StorageConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_converter,
};
pub use error::{ConversionFailure, ConversionIssue, IatiError, Result};
pub use registry::{Domain, FileType, FileTypeOption, MaxCount};
pub use types::{AttemptOutcome, DEFAULT_NAMESPACE, Namespace, TrackingRecord, Validity};
