//! Folding shard accumulators into one.
//!
//! Merge semantics differ per kind of data:
//! - chunks, doc lengths and postings are appended with ids shifted by the
//!   target's chunk count; phrase and chargram vocabularies stay within their
//!   `max_unique` caps
//! - file-keyed bookkeeping keeps the target's entry and only adds keys the
//!   target lacks
//! - counters are summed
//! - scanned and skipped file lists are concatenated, target first

use super::state::IndexState;
use crate::error::{IndexError, IndexResult};
use crate::types::Field;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn first_writer_wins<V>(target: &mut BTreeMap<String, V>, source: BTreeMap<String, V>) {
    for (key, value) in source {
        target.entry(key).or_insert(value);
    }
}

impl IndexState {
    /// Fold `source` into this accumulator.
    ///
    /// Fails with `DocIdExhausted` when the combined chunk count would not
    /// fit a doc id; the target is left untouched in that case.
    pub fn merge_from(&mut self, source: IndexState) -> IndexResult<()> {
        let combined = self.chunks.len() + source.chunks.len();
        if combined > u32::MAX as usize {
            return Err(IndexError::DocIdExhausted);
        }
        let offset = self.chunks.len() as u32;

        let IndexState {
            token_postings,
            phrase_postings,
            chargram_postings,
            field_postings,
            doc_lengths,
            field_doc_lengths,
            chunks,
            total_tokens,
            scanned_files,
            skipped_files,
            file_info,
            file_details,
            chunk_uid_files,
            file_relations,
            manifest,
            tokenization,
            phrase_guard,
            chargram_guard,
        } = source;

        self.chunks.extend(chunks.into_iter().map(|mut chunk| {
            chunk.id = chunk.id.offset(offset);
            chunk
        }));
        self.doc_lengths.extend(doc_lengths);
        for (field, lengths) in field_doc_lengths.into_iter_fields() {
            self.field_doc_lengths.get_mut(field).extend(lengths);
        }

        self.phrase_guard.absorb(&phrase_guard);
        self.chargram_guard.absorb(&chargram_guard);

        self.token_postings.absorb_shifted(&token_postings, offset);
        self.phrase_postings
            .absorb_shifted_guarded(&phrase_postings, offset, &mut self.phrase_guard);
        self.chargram_postings
            .absorb_shifted_guarded(&chargram_postings, offset, &mut self.chargram_guard);
        for field in Field::ALL {
            self.field_postings
                .get_mut(field)
                .absorb_shifted(field_postings.get(field), offset);
        }

        first_writer_wins(&mut self.file_info, file_info);
        first_writer_wins(&mut self.file_details, file_details);
        first_writer_wins(&mut self.chunk_uid_files, chunk_uid_files);
        first_writer_wins(&mut self.file_relations, file_relations);

        self.total_tokens += total_tokens;
        self.manifest.absorb(&manifest);
        self.tokenization.absorb(&tokenization);

        self.scanned_files.extend(scanned_files);
        self.skipped_files.extend(skipped_files);

        Ok(())
    }
}

/// Merge keyed accumulators in ascending key order.
///
/// The order depends only on the keys, so the merged doc ids and vocabulary
/// order are the same however the partial states were scheduled.
pub fn merge_ordered<K: Ord + std::fmt::Debug>(
    mut parts: Vec<(K, IndexState)>,
    cancel: Option<&CancellationToken>,
) -> IndexResult<(IndexState, usize)> {
    parts.sort_by(|a, b| a.0.cmp(&b.0));

    let mut merged = IndexState::new();
    let mut merges = 0;
    for (key, part) in parts {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(IndexError::Cancelled { phase: "merge" });
        }
        debug!("Merging {key:?} ({} chunks)", part.len());
        merged.merge_from(part)?;
        merges += 1;
    }
    Ok((merged, merges))
}
