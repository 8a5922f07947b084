use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Critical source '{source_name}' failed: {cause}")]
    CriticalSource { source_name: String, cause: String },

    #[error("Critical source '{0}' is not listed in the manifest")]
    CriticalSourceMissing(String),

    #[error("Duplicate business key in {table}: {key}")]
    DuplicateBusinessKey { table: String, key: String },

    #[error("Hedonic model error: {0}")]
    Hedonic(#[from] HedonicError),
}

/// Failure to turn one manifest entry into normalized rows.
///
/// These never leave the per-source boundary on their own: the criticality
/// router decides whether they abort the run or mark the source as absent.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("extract not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read extract: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed delimited data: {0}")]
    Csv(#[from] csv::Error),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("extract has no usable data rows")]
    Empty,

    #[error("no normalizer registered for source '{0}'")]
    NoNormalizer(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HedonicError {
    #[error("insufficient data: {available} usable observations, {required} required")]
    DataInsufficient { available: usize, required: usize },

    #[error("design matrix is singular: {0}")]
    SingularDesign(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
