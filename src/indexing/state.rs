//! The per-shard accumulator.
//!
//! An `IndexState` is fed one chunk at a time through `append`, then either
//! merged into a parent (`merge_from`) or handed to the postings builder.
//! Chunk ids are dense and equal to the chunk's position, so every per-doc
//! vector (`doc_lengths`, field lengths, `chunks`) is indexed by `DocId`.

use super::chunk::{Chunk, ChunkRecord};
use super::file_info::{FileDetails, FileInfo, SkipReason, SkippedFile};
use super::progress::{ManifestStats, TokenizationStats};
use super::retention::{RetentionEvent, RetentionPolicy, TokenRetention};
use crate::config::{PostingsConfig, TokenSource};
use crate::error::{IndexError, IndexResult};
use crate::postings::{
    PostingsGuard, PostingsMap, append_phrase_ngrams, collect_chargrams,
};
use crate::types::{DocId, Field, FieldSet, TermPosting};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct IndexState {
    pub(crate) token_postings: PostingsMap<TermPosting>,
    pub(crate) phrase_postings: PostingsMap<DocId>,
    pub(crate) chargram_postings: PostingsMap<DocId>,
    pub(crate) field_postings: FieldSet<PostingsMap<TermPosting>>,
    pub(crate) doc_lengths: Vec<u32>,
    pub(crate) field_doc_lengths: FieldSet<Vec<u32>>,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) total_tokens: u64,
    pub(crate) scanned_files: Vec<String>,
    pub(crate) skipped_files: Vec<SkippedFile>,
    pub(crate) file_info: BTreeMap<String, FileInfo>,
    pub(crate) file_details: BTreeMap<String, FileDetails>,
    pub(crate) chunk_uid_files: BTreeMap<String, String>,
    pub(crate) file_relations: BTreeMap<String, Value>,
    pub(crate) manifest: ManifestStats,
    pub(crate) tokenization: TokenizationStats,
    pub(crate) phrase_guard: PostingsGuard,
    pub(crate) chargram_guard: PostingsGuard,
}

/// Count term frequencies, keeping first-occurrence order.
fn term_frequencies<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Vec<(&'a str, u32)> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        match slots.get(token) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                slots.insert(token, counts.len());
                counts.push((token, 1));
            }
        }
    }
    counts
}

/// Tokens of the selected fields, with an empty token between fields so
/// phrases never span two fields.
fn field_stream<'a>(record: &'a ChunkRecord, fields: &[Field]) -> Vec<&'a str> {
    let mut stream = Vec::new();
    for &field in fields {
        let tokens = record.fields.get(field);
        if tokens.is_empty() {
            continue;
        }
        if !stream.is_empty() {
            stream.push("");
        }
        stream.extend(tokens.iter().map(String::as_str));
    }
    stream
}

impl IndexState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and return its id.
    ///
    /// Fails only when the doc id space is exhausted.
    pub fn append(
        &mut self,
        record: ChunkRecord,
        policy: &mut RetentionPolicy,
        config: &PostingsConfig,
    ) -> IndexResult<DocId> {
        let (doc_id, event) = self.append_chunk(record, policy, config)?;
        if let RetentionEvent::Downgraded(retention) = event {
            self.downgrade(retention, policy);
        }
        Ok(doc_id)
    }

    /// Like `append`, but a retention downgrade also trims `also_trim`.
    ///
    /// Used when chunks are appended to a working accumulator while an
    /// already-populated one shares the same retention budget.
    pub fn append_with_trim_target(
        &mut self,
        record: ChunkRecord,
        policy: &mut RetentionPolicy,
        config: &PostingsConfig,
        also_trim: &mut IndexState,
    ) -> IndexResult<DocId> {
        let (doc_id, event) = self.append_chunk(record, policy, config)?;
        if let RetentionEvent::Downgraded(retention) = event {
            self.downgrade(retention, policy);
            also_trim.apply_retention(retention);
        }
        Ok(doc_id)
    }

    /// Trim every retained chunk's tokens to `retention`.
    pub fn apply_retention(&mut self, retention: TokenRetention) {
        for chunk in &mut self.chunks {
            retention.apply(&mut chunk.tokens);
        }
    }

    fn downgrade(&mut self, retention: TokenRetention, policy: &RetentionPolicy) {
        info!(
            "Token budget exceeded ({} > {} tokens); retaining {retention} from now on",
            policy.budget().used(),
            policy.budget().max_tokens()
        );
        self.apply_retention(retention);
    }

    fn next_doc_id(&self) -> IndexResult<DocId> {
        u32::try_from(self.chunks.len())
            .map(DocId::new)
            .map_err(|_| IndexError::DocIdExhausted)
    }

    fn append_chunk(
        &mut self,
        record: ChunkRecord,
        policy: &mut RetentionPolicy,
        config: &PostingsConfig,
    ) -> IndexResult<(DocId, RetentionEvent)> {
        let doc_id = self.next_doc_id()?;
        let token_count = u32::try_from(record.tokens.len()).unwrap_or(u32::MAX);
        let has_content = record.has_content();

        self.doc_lengths.push(token_count);

        if has_content {
            for (term, tf) in term_frequencies(record.tokens.iter().map(String::as_str)) {
                self.token_postings.append(term, TermPosting::new(doc_id, tf));
            }
            self.append_phrases(&record, doc_id, config);
            self.append_chargrams(&record, doc_id, config);
        }
        self.append_fields(&record, doc_id, token_count, has_content, config);

        self.total_tokens += u64::from(token_count);
        self.tokenization.chunks += 1;
        self.tokenization.tokens += u64::from(token_count);
        self.tokenization.seq_tokens += record.seq.as_ref().map_or(0, |seq| seq.len() as u64);

        let event = policy.charge(record.budget_tokens());
        let chunk = self.retain(record, doc_id, token_count, policy.current());
        self.chunks.push(chunk);

        Ok((doc_id, event))
    }

    fn append_phrases(&mut self, record: &ChunkRecord, doc_id: DocId, config: &PostingsConfig) {
        if !config.enable_phrase_ngrams {
            return;
        }
        self.phrase_guard.max_unique = config.phrase_max_unique;
        self.phrase_guard.max_per_chunk = config.phrase_max_per_chunk;

        let emitted = match config.phrase_source {
            TokenSource::Full => append_phrase_ngrams(
                &mut self.phrase_postings,
                record.phrase_stream(),
                doc_id,
                config.phrase_min_n,
                config.phrase_max_n,
                &mut self.phrase_guard,
            ),
            TokenSource::Fields => append_phrase_ngrams(
                &mut self.phrase_postings,
                field_stream(record, &config.source_fields).as_slice(),
                doc_id,
                config.phrase_min_n,
                config.phrase_max_n,
                &mut self.phrase_guard,
            ),
        };
        self.tokenization.phrase_ngrams += emitted as u64;
    }

    fn append_chargrams(&mut self, record: &ChunkRecord, doc_id: DocId, config: &PostingsConfig) {
        if !config.enable_chargrams {
            return;
        }
        self.chargram_guard.max_unique = config.chargram_max_unique;
        self.chargram_guard.max_per_chunk = config.chargram_max_per_chunk;

        let grams = match &record.chargrams {
            Some(precomputed) => precomputed.clone(),
            None => {
                let words: Vec<&str> = match config.chargram_source {
                    TokenSource::Full => record.tokens.iter().map(String::as_str).collect(),
                    TokenSource::Fields => field_stream(record, &config.source_fields),
                };
                let collected = collect_chargrams(
                    words,
                    config.chargram_min_n,
                    config.chargram_max_n,
                    config.chargram_max_token_length,
                    config.chargram_max_per_chunk,
                );
                if collected.truncated {
                    self.chargram_guard.record_truncated_chunk();
                }
                collected.grams
            }
        };

        for gram in &grams {
            if !gram.is_empty() {
                self.chargram_postings
                    .append_guarded(gram, doc_id, &mut self.chargram_guard);
            }
        }
        self.tokenization.chargrams += grams.len() as u64;
    }

    fn append_fields(
        &mut self,
        record: &ChunkRecord,
        doc_id: DocId,
        token_count: u32,
        has_content: bool,
        config: &PostingsConfig,
    ) {
        for field in Field::ALL {
            if !field.has_own_postings() {
                let length = if has_content && config.fielded {
                    token_count
                } else {
                    0
                };
                self.field_doc_lengths.get_mut(field).push(length);
                continue;
            }

            let tokens = record.fields.get(field);
            if !has_content || !config.fielded || tokens.is_empty() {
                self.field_doc_lengths.get_mut(field).push(0);
                continue;
            }

            let length = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
            self.field_doc_lengths.get_mut(field).push(length);
            let postings = self.field_postings.get_mut(field);
            for (term, tf) in term_frequencies(tokens.iter().map(String::as_str)) {
                postings.append(term, TermPosting::new(doc_id, tf));
            }
        }
    }

    fn retain(
        &mut self,
        record: ChunkRecord,
        doc_id: DocId,
        token_count: u32,
        retention: TokenRetention,
    ) -> Chunk {
        let ChunkRecord {
            file,
            chunk_uid,
            mut tokens,
            embedding,
            embed_doc,
            embed_code,
            embedding_u8,
            embed_doc_u8,
            embed_code_u8,
            relations,
            metadata,
            ..
        } = record;

        if let Some(uid) = &chunk_uid {
            self.chunk_uid_files
                .entry(uid.clone())
                .or_insert_with(|| file.clone());
        }
        if let Some(relations) = relations {
            self.record_relations(file.clone(), relations);
        }
        let details = self.file_details.entry(file.clone()).or_default();
        details.chunks += 1;
        details.tokens += u64::from(token_count);

        retention.apply(&mut tokens);
        Chunk {
            id: doc_id,
            file,
            chunk_uid,
            tokens,
            token_count,
            embedding,
            embed_doc,
            embed_code,
            embedding_u8,
            embed_doc_u8,
            embed_code_u8,
            metadata,
        }
    }

    /// Record a file that produced chunks
    pub fn record_scanned(&mut self, path: impl Into<String>) {
        self.scanned_files.push(path.into());
    }

    /// Record a file that was skipped and why
    pub fn record_skipped(&mut self, path: impl Into<String>, reason: SkipReason) {
        let path = path.into();
        debug!("Skipping {path}: {reason}");
        self.skipped_files.push(SkippedFile { path, reason });
    }

    /// Record file info; the first record for a path wins
    pub fn record_file_info(&mut self, info: FileInfo) {
        self.file_info.entry(info.path.clone()).or_insert(info);
    }

    /// Record a relation summary; the first summary for a path wins
    pub fn record_relations(&mut self, path: impl Into<String>, summary: Value) {
        self.file_relations.entry(path.into()).or_insert(summary);
    }

    pub fn record_manifest(&mut self, bytes: u64, rows: u64) {
        self.manifest.bytes += bytes;
        self.manifest.rows += rows;
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: DocId) -> Option<&Chunk> {
        self.chunks.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn doc_lengths(&self) -> &[u32] {
        &self.doc_lengths
    }

    pub fn field_doc_lengths(&self, field: Field) -> &[u32] {
        self.field_doc_lengths.get(field)
    }

    pub fn token_postings(&self) -> &PostingsMap<TermPosting> {
        &self.token_postings
    }

    pub fn phrase_postings(&self) -> &PostingsMap<DocId> {
        &self.phrase_postings
    }

    pub fn chargram_postings(&self) -> &PostingsMap<DocId> {
        &self.chargram_postings
    }

    pub fn field_postings(&self, field: Field) -> &PostingsMap<TermPosting> {
        self.field_postings.get(field)
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn scanned_files(&self) -> &[String] {
        &self.scanned_files
    }

    pub fn skipped_files(&self) -> &[SkippedFile] {
        &self.skipped_files
    }

    pub fn file_info(&self) -> &BTreeMap<String, FileInfo> {
        &self.file_info
    }

    pub fn file_details(&self) -> &BTreeMap<String, FileDetails> {
        &self.file_details
    }

    pub fn chunk_uid_file(&self, uid: &str) -> Option<&str> {
        self.chunk_uid_files.get(uid).map(String::as_str)
    }

    pub fn file_relations(&self) -> &BTreeMap<String, Value> {
        &self.file_relations
    }

    pub fn manifest(&self) -> &ManifestStats {
        &self.manifest
    }

    pub fn tokenization(&self) -> &TokenizationStats {
        &self.tokenization
    }

    pub fn phrase_guard(&self) -> &PostingsGuard {
        &self.phrase_guard
    }

    pub fn chargram_guard(&self) -> &PostingsGuard {
        &self.chargram_guard
    }
}
