//! Error types for the gaitfuse re-identification pipeline.
//!
//! Errors are grouped by concern so a failed run names the stage that broke
//! (configuration, on-disk data, scoring) together with the offending path
//! or shape.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for gaitfuse operations.
#[derive(Error, Debug)]
pub enum GaitFuseError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Descriptor files, manifests and batch alignment
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Distance computation and retrieval scoring
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Failure reported by an external collaborator (backbone, loss, optimizer, checkpoint sink)
    #[error("Model error: {0}")]
    Model(String),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Architecture name not in the supported set
    #[error("Unsupported architecture '{name}' (expected one of: {supported})")]
    UnsupportedArchitecture { name: String, supported: String },

    /// Architecture needs pretrained weights that are absent
    #[error("Can't find pretrained model: {0}")]
    MissingPretrained(PathBuf),
}

/// Data-integrity errors. None of these are retried.
#[derive(Error, Debug)]
pub enum DataError {
    /// GEI descriptor file is missing
    #[error("GEI descriptor not found: {0}")]
    DescriptorNotFound(PathBuf),

    /// GEI descriptor exists but cannot be used
    #[error("Malformed GEI descriptor {path}: {message}")]
    MalformedDescriptor { path: PathBuf, message: String },

    /// Two sources that must advance in lockstep disagree on batch size
    #[error("Batch size mismatch in {context}: expected {expected}, got {actual}")]
    BatchMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A sample manifest line could not be parsed
    #[error("Invalid manifest {path} (line {line}): {message}")]
    Manifest {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A precomputed clip embedding file cannot be used
    #[error("Invalid clip embedding {path}: {message}")]
    ClipEmbedding { path: PathBuf, message: String },
}

/// Errors raised while building feature sets and scoring them.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Feature vectors disagree on dimensionality
    #[error("Feature dimension mismatch: {context} ({expected} vs {actual})")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Metadata length does not match the distance matrix
    #[error("Metadata length mismatch for {side}: {expected} rows in distance matrix, {actual} metadata entries")]
    MetadataLength {
        side: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A query or gallery set has no samples
    #[error("Empty {0} set")]
    EmptySet(&'static str),

    /// A sample carries zero clips, so it cannot be pooled
    #[error("Sample has no clip embeddings to pool")]
    NoClips,

    /// Features produced a NaN or infinite distance
    #[error("Non-finite distance between query {query} and gallery {gallery}; features contain NaN or infinity")]
    NonFiniteDistance { query: usize, gallery: usize },

    /// No query had a valid match after exclusion
    #[error("Error: all query identities do not appear in gallery ({num_queries} queries, none scored)")]
    NoValidQueries { num_queries: usize },
}

/// Convenience type alias for gaitfuse results.
pub type Result<T> = std::result::Result<T, GaitFuseError>;

/// Convenience type alias for scoring results.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
