//! Finalization of an accumulator into export-ready postings.

use super::cell::PostingEntry;
use super::guard::PostingsGuard;
use super::vocab::FlatPostings;
use crate::config::{EmbeddingConfig, PostingsConfig};
use crate::error::{IndexError, IndexResult};
use crate::indexing::{Chunk, IndexState};
use crate::offload::WorkOffload;
use crate::types::{DocId, Field, FieldSet, TermPosting};
use crate::vector::{DenseVectors, QuantizationParams, build_dense_vectors};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Average chunk length (in tokens) at which the long-document pair applies.
pub const LONG_DOC_THRESHOLD: f64 = 800.0;

/// BM25 saturation and length-normalization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

/// Pick BM25 parameters from the corpus shape.
///
/// Long chunks (average at least 800 tokens) get a gentler length penalty.
/// An empty corpus gets the textbook defaults.
pub fn choose_bm25(avg_doc_len: f64, total_docs: usize) -> Bm25Params {
    if total_docs == 0 {
        Bm25Params { k1: 1.2, b: 0.75 }
    } else if avg_doc_len >= LONG_DOC_THRESHOLD {
        Bm25Params { k1: 1.2, b: 0.6 }
    } else {
        Bm25Params { k1: 1.7, b: 0.8 }
    }
}

/// Chargram document-frequency report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChargramStats {
    pub kept: usize,
    pub dropped_high_df: usize,
    pub max_df: usize,
}

/// Postings and lengths for one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPostings {
    pub postings: FlatPostings<TermPosting>,
    pub doc_lengths: Vec<u32>,
    pub avg_len: f64,
}

/// Everything an artifact writer needs, in memory.
#[derive(Debug, Clone)]
pub struct PostingsOutput {
    pub bm25: Bm25Params,
    pub quantization: QuantizationParams,
    pub total_docs: usize,
    pub doc_lengths: Vec<u32>,
    pub avg_doc_len: f64,
    pub token: FlatPostings<TermPosting>,
    pub phrase: FlatPostings<DocId>,
    pub chargram: FlatPostings<DocId>,
    /// `Body` carries lengths only; its postings are the main token index
    pub fields: FieldSet<FieldPostings>,
    pub dense: DenseVectors,
    pub chargram_stats: ChargramStats,
    pub phrase_guard: PostingsGuard,
    pub chargram_guard: PostingsGuard,
    pub chunks: Vec<Chunk>,
}

fn average(lengths: &[u32]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    lengths.iter().map(|&len| u64::from(len)).sum::<u64>() as f64 / lengths.len() as f64
}

/// Sort a list by doc id if it is out of order, collapsing duplicate ids.
fn normalize_list<E: PostingEntry>(list: &mut Vec<E>) {
    if list.windows(2).all(|pair| pair[0].doc_id() < pair[1].doc_id()) {
        return;
    }
    list.sort_by_key(PostingEntry::doc_id);
    list.dedup_by_key(|entry| entry.doc_id());
}

fn normalize_flat<E: PostingEntry>(flat: &mut FlatPostings<E>) {
    for list in &mut flat.postings {
        normalize_list(list);
    }
}

/// Turns a finished `IndexState` into a `PostingsOutput`.
pub struct PostingsBuilder<'a> {
    postings: PostingsConfig,
    embeddings: &'a EmbeddingConfig,
    offload: Option<&'a dyn WorkOffload>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> PostingsBuilder<'a> {
    pub fn new(postings: &PostingsConfig, embeddings: &'a EmbeddingConfig) -> Self {
        Self {
            postings: postings.normalized(),
            embeddings,
            offload: None,
            cancel: None,
        }
    }

    pub fn with_offload(mut self, offload: Option<&'a dyn WorkOffload>) -> Self {
        self.offload = offload;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn checkpoint(&self, phase: &'static str) -> IndexResult<()> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(IndexError::Cancelled { phase });
        }
        Ok(())
    }

    /// Finalize `state`.
    ///
    /// Empty and partial corpora always succeed. Errors come only from an
    /// invalid quantization configuration or cancellation.
    pub fn build(&self, state: IndexState) -> IndexResult<PostingsOutput> {
        let quantization = self.embeddings.quantization()?;

        let IndexState {
            token_postings,
            phrase_postings,
            chargram_postings,
            field_postings,
            doc_lengths,
            field_doc_lengths,
            chunks,
            phrase_guard,
            chargram_guard,
            ..
        } = state;

        let total_docs = chunks.len();
        let avg_doc_len = average(&doc_lengths);
        let bm25 = choose_bm25(avg_doc_len, total_docs);
        debug!(
            "BM25 k1={} b={} for {total_docs} chunks averaging {avg_doc_len:.1} tokens",
            bm25.k1, bm25.b
        );

        self.checkpoint("token postings")?;
        let mut token = token_postings.into_flat();
        normalize_flat(&mut token);

        self.checkpoint("phrase postings")?;
        let mut phrase = if self.postings.enable_phrase_ngrams {
            phrase_postings.into_flat()
        } else {
            FlatPostings::default()
        };
        normalize_flat(&mut phrase);

        self.checkpoint("chargram postings")?;
        let mut chargram_stats = ChargramStats::default();
        let max_df = self.postings.chargram_max_df;
        let mut chargram = if self.postings.enable_chargrams {
            chargram_postings.into_flat_filtered(|list| {
                chargram_stats.max_df = chargram_stats.max_df.max(list.len());
                if max_df > 0 && list.len() > max_df {
                    chargram_stats.dropped_high_df += 1;
                    return false;
                }
                true
            })
        } else {
            FlatPostings::default()
        };
        normalize_flat(&mut chargram);
        chargram_stats.kept = chargram.len();

        self.checkpoint("field postings")?;
        let mut fields: FieldSet<FieldPostings> = FieldSet::default();
        let mut field_maps = field_postings.into_iter_fields();
        for (field, lengths) in field_doc_lengths.into_iter_fields() {
            let postings = match field_maps.next() {
                Some((_, map)) if self.postings.fielded && field.has_own_postings() => {
                    let mut flat = map.into_flat();
                    normalize_flat(&mut flat);
                    flat
                }
                _ => FlatPostings::default(),
            };
            *fields.get_mut(field) = FieldPostings {
                postings,
                avg_len: average(&lengths),
                doc_lengths: lengths,
            };
        }

        self.checkpoint("dense vectors")?;
        let dense = build_dense_vectors(
            &chunks,
            self.embeddings,
            quantization,
            self.offload,
            self.cancel,
        )?;

        info!(
            "Postings built: {} docs, {} tokens, {} phrases, {} chargrams, dims {}",
            total_docs,
            token.len(),
            phrase.len(),
            chargram.len(),
            dense.dims
        );

        Ok(PostingsOutput {
            bm25,
            quantization,
            total_docs,
            doc_lengths,
            avg_doc_len,
            token,
            phrase,
            chargram,
            fields,
            dense,
            chargram_stats,
            phrase_guard,
            chargram_guard,
            chunks,
        })
    }
}

impl PostingsOutput {
    pub fn field(&self, field: Field) -> &FieldPostings {
        self.fields.get(field)
    }
}
