//! Posting structures and their finalization.
//!
//! Leaf types live here (`PostingCell`, `PostingsMap`, guards and n-gram
//! generation); `PostingsBuilder` turns a finished accumulator into flat,
//! export-ready postings plus quantized dense vectors.

mod builder;
mod cell;
mod guard;
mod ngrams;
mod vocab;

pub use builder::{Bm25Params, ChargramStats, PostingsBuilder, PostingsOutput, choose_bm25};
pub use cell::{PostingCell, PostingEntry};
pub use guard::PostingsGuard;
pub use ngrams::{
    CHARGRAM_END, CHARGRAM_START, ChunkChargrams, PHRASE_SEPARATOR, append_phrase_ngrams,
    collect_chargrams, for_each_chargram,
};
pub use vocab::{FlatPostings, PostingsMap};
