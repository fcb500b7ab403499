//! Compact posting lists.
//!
//! Most terms in phrase and chargram maps occur in exactly one chunk, so a
//! cell holds a single entry inline and only allocates once a second distinct
//! document shows up.

use crate::types::{DocId, TermPosting};

/// An entry that can live in a posting cell.
pub trait PostingEntry: Copy {
    fn doc_id(&self) -> DocId;

    /// The same entry re-addressed by a merge offset
    fn shifted(self, offset: u32) -> Self;
}

impl PostingEntry for DocId {
    fn doc_id(&self) -> DocId {
        *self
    }

    fn shifted(self, offset: u32) -> Self {
        self.offset(offset)
    }
}

impl PostingEntry for TermPosting {
    fn doc_id(&self) -> DocId {
        self.doc_id
    }

    fn shifted(self, offset: u32) -> Self {
        TermPosting {
            doc_id: self.doc_id.offset(offset),
            tf: self.tf,
        }
    }
}

/// Posting list for one term: nothing, one entry, or many.
///
/// Cells are promoted `Empty -> Single -> Many` and never demoted.
#[derive(Debug, Clone, PartialEq)]
pub enum PostingCell<E> {
    Empty,
    Single(E),
    Many(Vec<E>),
}

impl<E> Default for PostingCell<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E: PostingEntry> PostingCell<E> {
    /// Append an entry unless its doc id equals the last one recorded.
    ///
    /// Returns whether the entry was stored.
    pub fn push(&mut self, entry: E) -> bool {
        match self {
            Self::Empty => {
                *self = Self::Single(entry);
                true
            }
            Self::Single(current) => {
                if current.doc_id() == entry.doc_id() {
                    return false;
                }
                let first = *current;
                *self = Self::Many(vec![first, entry]);
                true
            }
            Self::Many(entries) => {
                if entries.last().map(PostingEntry::doc_id) == Some(entry.doc_id()) {
                    return false;
                }
                entries.push(entry);
                true
            }
        }
    }

    /// The single iteration adapter over every cell shape.
    pub fn as_slice(&self) -> &[E] {
        match self {
            Self::Empty => &[],
            Self::Single(entry) => std::slice::from_ref(entry),
            Self::Many(entries) => entries,
        }
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.as_slice().iter().map(PostingEntry::doc_id)
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn into_vec(self) -> Vec<E> {
        match self {
            Self::Empty => Vec::new(),
            Self::Single(entry) => vec![entry],
            Self::Many(entries) => entries,
        }
    }
}
