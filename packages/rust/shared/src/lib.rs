//! Shared types, error model, and configuration for bidsqc.
//!
//! This crate is the foundation depended on by all other bidsqc crates.
//! It provides:
//! - [`BidsQcError`] — the unified error type
//! - Domain types ([`QcRecord`], subject label normalization)
//! - Configuration ([`AppConfig`], [`TemplateConfig`], [`ReportConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ReportConfig, ReportSection, TemplateConfig, TemplatesSection, config_dir,
    config_file_path, load_config, load_config_from,
};
pub use error::{BidsQcError, Result};
pub use types::{
    QcRecord, QcRecordFields, SUBJECT_PREFIX, normalize_subject, normalize_subjects,
    strip_subject_prefix,
};
