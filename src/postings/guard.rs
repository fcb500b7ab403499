//! Size guards for the high-cardinality posting maps.

use serde::Serialize;

/// Limits and counters for one posting map (phrases or chargrams).
///
/// `max_unique` caps the vocabulary: once reached, new terms are dropped and
/// the guard is disabled with reason `max-unique`. Existing terms keep
/// receiving postings. `max_per_chunk` caps how many grams a single chunk may
/// emit; chunks that hit it are counted as truncated. Merging accumulators
/// keeps enforcing `max_unique` on the combined vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostingsGuard {
    pub max_unique: usize,
    pub max_per_chunk: usize,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub dropped: u64,
    pub truncated_chunks: u64,
    pub peak_unique: usize,
}

impl PostingsGuard {
    pub fn new(max_unique: usize, max_per_chunk: usize) -> Self {
        Self {
            max_unique,
            max_per_chunk,
            ..Self::default()
        }
    }

    /// Whether a map of `current_size` may admit a new term.
    ///
    /// Records the drop when it may not.
    pub fn admit_new_term(&mut self, current_size: usize) -> bool {
        if self.max_unique > 0 && current_size >= self.max_unique {
            if !self.disabled {
                self.disabled = true;
                self.reason.get_or_insert("max-unique");
            }
            self.dropped += 1;
            return false;
        }
        true
    }

    pub fn observe_size(&mut self, size: usize) {
        self.peak_unique = self.peak_unique.max(size);
    }

    /// Whether a chunk that already emitted `emitted` grams may emit another.
    pub fn chunk_has_room(&self, emitted: usize) -> bool {
        self.max_per_chunk == 0 || emitted < self.max_per_chunk
    }

    pub fn record_truncated_chunk(&mut self) {
        self.truncated_chunks += 1;
    }

    /// Whether anything noteworthy happened (used to decide on warnings)
    pub fn tripped(&self) -> bool {
        self.disabled || self.dropped > 0 || self.truncated_chunks > 0
    }

    /// Fold another accumulator's counters into this one.
    ///
    /// Counters add up; the peak is the larger of the two peaks. Limits this
    /// guard does not set yet are taken from `other`.
    pub fn absorb(&mut self, other: &PostingsGuard) {
        if self.max_unique == 0 {
            self.max_unique = other.max_unique;
        }
        if self.max_per_chunk == 0 {
            self.max_per_chunk = other.max_per_chunk;
        }
        if other.disabled && !self.disabled {
            self.disabled = true;
            self.reason = self.reason.or(other.reason);
        }
        self.dropped += other.dropped;
        self.truncated_chunks += other.truncated_chunks;
        self.peak_unique = self.peak_unique.max(other.peak_unique);
    }
}
