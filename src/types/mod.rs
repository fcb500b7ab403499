mod field;

pub use field::{Field, FieldSet};

use serde::{Deserialize, Serialize};

/// Dense document (chunk) identifier.
///
/// Unlike file or shard identifiers, zero is a valid doc id: the first chunk
/// appended to an accumulator gets `DocId(0)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocId(pub u32);

impl DocId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Convert to a vector index
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Shift this id by a merge offset.
    ///
    /// Saturates at `u32::MAX`; `IndexState::merge_from` rejects merges whose
    /// combined chunk count would get there.
    pub fn offset(self, by: u32) -> Self {
        Self(self.0.saturating_add(by))
    }
}

impl From<u32> for DocId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A token posting: the chunk a term occurs in and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermPosting {
    pub doc_id: DocId,
    pub tf: u32,
}

impl TermPosting {
    pub fn new(doc_id: DocId, tf: u32) -> Self {
        Self { doc_id, tf }
    }
}
