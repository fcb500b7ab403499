//! File-level bookkeeping kept next to the postings.
//!
//! Hashes use SHA256 so shard ids and content fingerprints are stable across
//! runs and platforms.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Information about an indexed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Repository-relative path
    pub path: String,
    /// SHA256 hash of file content, when the content was read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub bytes: u64,
    pub lines: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, bytes: u64, lines: u64) -> Self {
        Self {
            path: path.into(),
            hash: None,
            bytes,
            lines,
            language: None,
        }
    }

    /// Build file info from content that was read in full
    pub fn from_content(path: impl Into<String>, content: &str) -> Self {
        Self {
            hash: Some(calculate_hash(content)),
            ..Self::new(path, content.len() as u64, count_lines(content))
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Check if file content has changed based on hash.
    ///
    /// Files recorded without a hash always count as changed.
    pub fn has_changed(&self, content: &str) -> bool {
        self.hash.as_deref() != Some(calculate_hash(content).as_str())
    }
}

/// Per-file counters updated as chunks are appended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDetails {
    pub chunks: u32,
    pub tokens: u64,
}

/// Why a file contributed no chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "reason", content = "detail")]
pub enum SkipReason {
    Unreadable(String),
    TooLarge,
    InvalidUtf8,
    Malformed(String),
    Empty,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unreadable(detail) => write!(f, "unreadable: {detail}"),
            SkipReason::TooLarge => f.write_str("too-large"),
            SkipReason::InvalidUtf8 => f.write_str("invalid-utf8"),
            SkipReason::Malformed(detail) => write!(f, "malformed: {detail}"),
            SkipReason::Empty => f.write_str("empty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Calculate SHA256 hash of content
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Count lines the way editors do: a trailing newline does not open a line
pub fn count_lines(content: &str) -> u64 {
    if content.is_empty() {
        return 0;
    }
    let newlines = content.bytes().filter(|&b| b == b'\n').count() as u64;
    if content.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}
