//! Error types for index construction
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Chunk source errors that abort the whole build
    #[error("Chunk source failed for '{path}': {reason}")]
    ChunkSource { path: PathBuf, reason: String },

    /// Shard planning errors
    #[error(transparent)]
    Shard(#[from] ShardError),

    /// Index state errors
    #[error("Failed to assign doc id: maximum chunk count reached")]
    DocIdExhausted,

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    /// Cooperative cancellation observed at a phase boundary
    #[error("Build cancelled during {phase}")]
    Cancelled { phase: &'static str },

    /// General errors for cases where we need to preserve existing behavior
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::ChunkSource { .. } => "CHUNK_SOURCE_ERROR",
            Self::Shard(_) => "SHARD_PLAN_ERROR",
            Self::DocIdExhausted => "DOC_ID_EXHAUSTED",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::ChunkSource { .. } => vec![
                "Validate the chunk file: one JSON object per line with a 'file' key",
                "Re-run the tokenizer stage that produced the chunk file",
            ],
            Self::Shard(ShardError::MissingPath { .. }) => vec![
                "Every file entry needs a relative path or an absolute path under the root",
            ],
            Self::DocIdExhausted => vec![
                "Split the repository into several builds",
                "Lower the chunking granularity so fewer chunks are produced",
            ],
            Self::ConfigError { .. } => vec![
                "Check .shardex/settings.toml and SX_* environment variables",
                "Delete the settings file to fall back to defaults",
            ],
            Self::Cancelled { .. } => vec!["Partial results were discarded, run the build again"],
            _ => vec![],
        }
    }
}

/// Errors raised by the shard planner
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("File entry at position {index} has no resolvable relative path")]
    MissingPath { index: usize },
}

/// Errors reported by a work offload.
///
/// `Unavailable` means the pool is saturated or shutting down and the same
/// request may succeed later. `Failed` means the batch itself could not be
/// processed and must be recomputed locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffloadError {
    #[error("Worker pool unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Worker task failed: {reason}")]
    Failed { reason: String },
}

impl OffloadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors produced while reading chunks for a single file.
///
/// These never abort a build: the pipeline records them as skipped files.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed chunk record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("File is not valid UTF-8")]
    InvalidUtf8,

    #[error("File exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for shard planning
pub type ShardResult<T> = Result<T, ShardError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, IndexError>;

    /// Add context with a path
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|e| {
            IndexError::General(format!("Error processing '{}': {}", path.display(), e))
        })
    }
}
