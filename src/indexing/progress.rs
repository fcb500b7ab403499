//! Statistics for index builds

use super::file_info::SkipReason;
use crate::postings::PostingsGuard;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Counters maintained by each accumulator while chunks are appended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenizationStats {
    pub chunks: u64,
    pub tokens: u64,
    pub seq_tokens: u64,
    pub phrase_ngrams: u64,
    pub chargrams: u64,
}

impl TokenizationStats {
    pub fn absorb(&mut self, other: &TokenizationStats) {
        self.chunks += other.chunks;
        self.tokens += other.tokens;
        self.seq_tokens += other.seq_tokens;
        self.phrase_ngrams += other.phrase_ngrams;
        self.chargrams += other.chargrams;
    }
}

/// Size of the chunk manifest fed into an accumulator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestStats {
    pub bytes: u64,
    pub rows: u64,
}

impl ManifestStats {
    pub fn absorb(&mut self, other: &ManifestStats) {
        self.bytes += other.bytes;
        self.rows += other.rows;
    }
}

/// Statistics collected during a build
#[derive(Debug, Default, Serialize)]
pub struct BuildStats {
    /// Number of files that produced chunks
    pub files_scanned: usize,

    /// Number of files skipped
    pub files_skipped: usize,

    pub chunks: usize,
    pub tokens: u64,
    pub shards: usize,
    pub merges: usize,

    /// Whether auto retention downgraded to sampling
    pub retention_downgraded: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phrase_guard: Option<PostingsGuard>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chargram_guard: Option<PostingsGuard>,

    /// Time elapsed during the build
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    /// Skip reasons (limited to first N)
    pub skipped: Vec<(String, SkipReason)>,

    #[serde(skip)]
    start_time: Option<Instant>,
}

fn serialize_secs<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(value.as_secs_f64())
}

impl BuildStats {
    /// Maximum skip reasons retained
    pub const MAX_SKIPPED: usize = 100;

    /// Create new stats and start timing
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop timing and record elapsed time
    pub fn stop_timing(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed = start.elapsed();
            self.start_time = None;
        }
    }

    /// Record a skipped file (keeps the first 100 reasons)
    pub fn add_skipped(&mut self, path: String, reason: SkipReason) {
        if self.skipped.len() < Self::MAX_SKIPPED {
            self.skipped.push((path, reason));
        }
        self.files_skipped += 1;
    }
}

impl std::fmt::Display for BuildStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Build complete:")?;
        writeln!(f, "  Files scanned: {}", self.files_scanned)?;
        writeln!(f, "  Files skipped: {}", self.files_skipped)?;
        writeln!(f, "  Chunks: {}", self.chunks)?;
        writeln!(f, "  Tokens: {}", self.tokens)?;
        writeln!(f, "  Shards: {} ({} merges)", self.shards, self.merges)?;
        write!(f, "  Time elapsed: {:.2}s", self.elapsed.as_secs_f64())?;

        let secs = self.elapsed.as_secs_f64();
        if self.files_scanned > 0 && secs > 0.0 {
            let files_per_sec = self.files_scanned as f64 / secs;
            write!(f, "\n  Performance: {files_per_sec:.0} files/second")?;
        }
        if self.retention_downgraded {
            write!(f, "\n  Token retention downgraded to sampling")?;
        }

        if !self.skipped.is_empty() {
            let shown = self.skipped.len().min(5);
            write!(f, "\n\nSkipped (showing first {shown}):")?;
            for (path, reason) in &self.skipped[..shown] {
                write!(f, "\n  {path}: {reason}")?;
            }
            if self.files_skipped > shown {
                write!(f, "\n  ... and {} more", self.files_skipped - shown)?;
            }
        }
        Ok(())
    }
}
