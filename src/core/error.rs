//! Reelindex Error Definitions
//!
//! Defines error types used throughout the pipeline. Item-level errors
//! (discovery, conversion, indexing) never abort a run; they are recorded
//! per item in the run summary. Configuration and store-bootstrap errors
//! are run-fatal.

use std::path::PathBuf;

use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    // =========================================================================
    // Discovery Errors (per-source, non-fatal to the run)
    // =========================================================================
    #[error("Source unreachable: {root}: {reason}")]
    Discovery { root: PathBuf, reason: String },

    // =========================================================================
    // Conversion Errors (per-item, non-fatal to the run)
    // =========================================================================
    #[error("Conversion failed for {path}: {reason}")]
    Conversion { path: PathBuf, reason: String },

    #[error("Conversion timed out for {path} after {seconds}s")]
    ConversionTimeout { path: PathBuf, seconds: u64 },

    // =========================================================================
    // Transcription Errors (per-item; indexing falls back to filename text)
    // =========================================================================
    #[error("Transcription failed for {path}: {reason}")]
    Transcription { path: PathBuf, reason: String },

    // =========================================================================
    // Indexing Errors (per-item; transient failures are retried)
    // =========================================================================
    #[error("Transient indexing failure: {0}")]
    IndexingTransient(String),

    #[error("Permanent indexing failure: {0}")]
    IndexingPermanent(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // =========================================================================
    // Store / Index Errors
    // =========================================================================
    #[error("Vector index is stale (stored: {stored}, configured: {configured}); set the rebuild flag to rebuild")]
    IndexStale { stored: String, configured: String },

    #[error("Store error: {0}")]
    Store(String),

    // =========================================================================
    // Query Errors (fatal to a single query call)
    // =========================================================================
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // =========================================================================
    // Configuration Errors (run-fatal)
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline result type
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Returns true when the error is likely transient and worth retrying.
    ///
    /// Only indexing-stage provider failures are ever retried; everything
    /// else either fails the item or fails the run.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::IndexingTransient(_))
    }
}
