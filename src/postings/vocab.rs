//! Order-preserving term → posting list map.

use super::cell::{PostingCell, PostingEntry};
use super::guard::PostingsGuard;
use std::collections::HashMap;
use std::sync::Arc;

/// Term vocabulary with posting cells, iterated in first-insertion order.
///
/// Terms get a dense index on first sight; cells live in a parallel vector so
/// flattening at build time needs no sort and no rehash.
#[derive(Debug, Clone)]
pub struct PostingsMap<E> {
    index: HashMap<Arc<str>, u32>,
    terms: Vec<Arc<str>>,
    cells: Vec<PostingCell<E>>,
}

impl<E> Default for PostingsMap<E> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            terms: Vec::new(),
            cells: Vec::new(),
        }
    }
}

/// Parallel `(vocab, postings)` vectors produced at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatPostings<E> {
    pub vocab: Vec<String>,
    pub postings: Vec<Vec<E>>,
}

impl<E> Default for FlatPostings<E> {
    fn default() -> Self {
        Self {
            vocab: Vec::new(),
            postings: Vec::new(),
        }
    }
}

impl<E> FlatPostings<E> {
    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    /// Posting list for a term (linear scan, intended for tests and tooling)
    pub fn get(&self, term: &str) -> Option<&[E]> {
        self.vocab
            .iter()
            .position(|candidate| candidate == term)
            .map(|pos| self.postings[pos].as_slice())
    }
}

impl<E: PostingEntry> PostingsMap<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn get(&self, term: &str) -> Option<&PostingCell<E>> {
        self.index
            .get(term)
            .map(|&slot| &self.cells[slot as usize])
    }

    pub fn contains(&self, term: &str) -> bool {
        self.index.contains_key(term)
    }

    /// Append an entry for `term`, creating the term if needed.
    pub fn append(&mut self, term: &str, entry: E) {
        self.slot_for(term).push(entry);
    }

    /// Append through a guard that may refuse new terms.
    ///
    /// Returns false when the term was new and the guard dropped it.
    pub fn append_guarded(&mut self, term: &str, entry: E, guard: &mut PostingsGuard) -> bool {
        if let Some(&slot) = self.index.get(term) {
            self.cells[slot as usize].push(entry);
            return true;
        }
        if !guard.admit_new_term(self.terms.len()) {
            return false;
        }
        self.slot_for(term).push(entry);
        guard.observe_size(self.terms.len());
        true
    }

    /// Re-emit every entry of `other` shifted by `offset`, in `other`'s order.
    pub fn absorb_shifted(&mut self, other: &PostingsMap<E>, offset: u32) {
        for (term, cell) in other.iter() {
            let target = self.slot_for(term);
            for entry in cell.as_slice() {
                target.push(entry.shifted(offset));
            }
        }
    }

    /// Like `absorb_shifted`, but terms new to this map pass through `guard`.
    ///
    /// Entries of refused terms are dropped entirely.
    pub fn absorb_shifted_guarded(
        &mut self,
        other: &PostingsMap<E>,
        offset: u32,
        guard: &mut PostingsGuard,
    ) {
        for (term, cell) in other.iter() {
            if !self.contains(term) && !guard.admit_new_term(self.terms.len()) {
                continue;
            }
            let target = self.slot_for(term);
            for entry in cell.as_slice() {
                target.push(entry.shifted(offset));
            }
        }
        guard.observe_size(self.terms.len());
    }

    /// Iterate `(term, cell)` in first-insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PostingCell<E>)> {
        self.terms
            .iter()
            .map(|term| term.as_ref())
            .zip(self.cells.iter())
    }

    /// Flatten into parallel vectors, keeping insertion order.
    pub fn into_flat(self) -> FlatPostings<E> {
        self.into_flat_filtered(|_| true)
    }

    /// Flatten, keeping only lists accepted by `keep`.
    pub fn into_flat_filtered(self, mut keep: impl FnMut(&[E]) -> bool) -> FlatPostings<E> {
        let mut flat = FlatPostings {
            vocab: Vec::with_capacity(self.terms.len()),
            postings: Vec::with_capacity(self.terms.len()),
        };
        for (term, cell) in self.terms.into_iter().zip(self.cells) {
            let list = cell.into_vec();
            if list.is_empty() || !keep(&list) {
                continue;
            }
            flat.vocab.push(term.as_ref().to_string());
            flat.postings.push(list);
        }
        flat
    }

    fn slot_for(&mut self, term: &str) -> &mut PostingCell<E> {
        let slot = match self.index.get(term) {
            Some(&slot) => slot as usize,
            None => {
                let slot = self.terms.len();
                let key: Arc<str> = Arc::from(term);
                self.index.insert(Arc::clone(&key), slot as u32);
                self.terms.push(key);
                self.cells.push(PostingCell::Empty);
                slot
            }
        };
        &mut self.cells[slot]
    }
}
