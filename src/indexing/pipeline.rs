//! Build orchestration: chunk source → accumulators → merge → postings.
//!
//! With sharding enabled every work item of the shard plan fills its own
//! accumulator on a rayon pool and the partial states are merged in
//! ascending `(shard id, part)` order. Without sharding, producer threads
//! read files ahead of a single appender that appends them in file order,
//! throttled by a `PendingQueue`.

use super::file_info::{FileDetails, FileInfo, SkipReason, SkippedFile};
use super::merge::merge_ordered;
use super::progress::{BuildStats, ManifestStats, TokenizationStats};
use super::queue::{PendingQueue, Reservation};
use super::retention::{RetentionPolicy, TokenBudget, TokenRetention};
use super::source::{ChunkSource, FileChunks};
use super::state::IndexState;
use crate::config::{PostingsConfig, Settings};
use crate::error::{ErrorContext, IndexError, IndexResult, ShardError, SourceError};
use crate::offload::WorkOffload;
use crate::postings::{PostingsBuilder, PostingsGuard, PostingsOutput};
use crate::sharding::{
    FileEntry, PerfProfile, PlanOptions, Shard, WorkItem, build_work_plan, plan_batches,
    plan_shards,
};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a full build
#[derive(Debug)]
pub struct BuildOutput {
    pub postings: PostingsOutput,
    pub stats: BuildStats,
    /// Empty when the build ran unsharded
    pub plan: Vec<Shard>,
    pub scanned_files: Vec<String>,
    pub skipped_files: Vec<SkippedFile>,
    pub file_info: BTreeMap<String, FileInfo>,
    pub file_details: BTreeMap<String, FileDetails>,
    pub file_relations: BTreeMap<String, Value>,
    pub tokenization: TokenizationStats,
    pub manifest: ManifestStats,
}

/// Accumulated but not yet finalized build
#[derive(Debug)]
pub struct Accumulated {
    pub state: IndexState,
    pub plan: Vec<Shard>,
    pub merges: usize,
    pub retention_downgraded: bool,
}

/// A file read by a producer, waiting for its turn at the appender
struct Produced<'q> {
    index: usize,
    result: Result<FileChunks, SourceError>,
    _reservation: Reservation<'q>,
}

/// Append one file's outcome to `state`.
///
/// A downgrade triggered while appending also trims `trim_target`.
fn ingest_file(
    state: &mut IndexState,
    rel: &str,
    result: Result<FileChunks, SourceError>,
    policy: &mut RetentionPolicy,
    config: &PostingsConfig,
    mut trim_target: Option<&mut IndexState>,
) -> IndexResult<()> {
    let file = match result {
        Ok(file) => file,
        Err(err) => {
            state.record_skipped(rel, err.into());
            return Ok(());
        }
    };
    let manifest_bytes = file.manifest_bytes();
    let FileChunks { info, chunks } = file;
    state.record_file_info(info);
    if chunks.is_empty() {
        state.record_skipped(rel, SkipReason::Empty);
        return Ok(());
    }

    state.record_manifest(manifest_bytes, chunks.len() as u64);
    for record in chunks {
        match trim_target.as_deref_mut() {
            Some(target) => state.append_with_trim_target(record, policy, config, target)?,
            None => state.append(record, policy, config)?,
        };
    }
    state.record_scanned(rel);
    Ok(())
}

fn warn_guard(kind: &str, guard: &PostingsGuard) {
    if !guard.tripped() {
        return;
    }
    if guard.disabled {
        warn!(
            "{kind} postings capped ({}): {} new terms dropped at {} unique",
            guard.reason.unwrap_or("limit"),
            guard.dropped,
            guard.max_unique
        );
    }
    if guard.truncated_chunks > 0 {
        warn!(
            "{kind} postings truncated for {} chunks (max {} per chunk)",
            guard.truncated_chunks, guard.max_per_chunk
        );
    }
}

pub struct IndexPipeline<'a> {
    settings: &'a Settings,
    postings: PostingsConfig,
    offload: Option<&'a dyn WorkOffload>,
    cancel: Option<&'a CancellationToken>,
    profile: Option<&'a PerfProfile>,
}

impl<'a> IndexPipeline<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            postings: settings.postings.normalized(),
            offload: None,
            cancel: None,
            profile: None,
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

    pub fn with_profile(mut self, profile: Option<&'a PerfProfile>) -> Self {
        self.profile = profile;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    fn checkpoint(&self, phase: &'static str) -> IndexResult<()> {
        if self.is_cancelled() {
            return Err(IndexError::Cancelled { phase });
        }
        Ok(())
    }

    fn resolve_policy(&self, total_files: usize) -> RetentionPolicy {
        let retention = &self.settings.retention;
        let budget = TokenBudget::new(retention.max_tokens);
        let policy = RetentionPolicy::resolve(retention, total_files, budget);
        debug!(
            "Token retention for {total_files} files: {}{}",
            policy.current(),
            if policy.is_auto() { " (auto)" } else { "" }
        );
        policy
    }

    /// Shard plan for `entries` under the configured options
    pub fn plan(&self, entries: &[FileEntry]) -> IndexResult<Vec<Shard>> {
        let options = PlanOptions::from_config(&self.settings.shards).with_profile(self.profile);
        Ok(plan_shards(entries, &options)?)
    }

    /// Fill one accumulator from the source, sharded or not.
    pub fn accumulate(&self, source: &dyn ChunkSource) -> IndexResult<Accumulated> {
        let entries = source.entries();
        let policy = self.resolve_policy(entries.len());

        let mut accumulated = if self.settings.shards.enabled {
            self.accumulate_sharded(source, &entries, &policy)?
        } else {
            self.accumulate_ordered(source, &entries, &policy)?
        };

        if policy.is_auto() && policy.budget().is_exceeded() {
            let retention = TokenRetention::Sample(self.settings.retention.sample_size);
            accumulated.state.apply_retention(retention);
            accumulated.retention_downgraded = true;
        }
        Ok(accumulated)
    }

    fn accumulate_sharded(
        &self,
        source: &dyn ChunkSource,
        entries: &[FileEntry],
        policy: &RetentionPolicy,
    ) -> IndexResult<Accumulated> {
        let plan = self.plan(entries)?;
        self.checkpoint("shard plan")?;

        let threads = self.settings.workers.threads.max(1);
        let work = build_work_plan(&plan);
        let batches = plan_batches(&work, threads);
        info!(
            "Sharding enabled: {} shards, {} work items in {} batches",
            plan.len(),
            work.len(),
            batches.len()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(batches.len().clamp(1, threads))
            .thread_name(|i| format!("shardex-shard-{i}"))
            .build()
            .context("Failed to start shard workers")?;

        let results: Vec<IndexResult<Vec<((String, usize), IndexState)>>> = pool.install(|| {
            batches
                .par_iter()
                .map(|batch| self.run_batch(batch, source, policy))
                .collect()
        });

        let mut parts = Vec::with_capacity(work.len());
        for result in results {
            parts.extend(result?);
        }
        let (state, merges) = merge_ordered(parts, self.cancel)?;
        info!("Merged {merges} shard states into {} chunks", state.len());

        Ok(Accumulated {
            state,
            plan,
            merges,
            retention_downgraded: false,
        })
    }

    fn run_batch(
        &self,
        batch: &[WorkItem<'_>],
        source: &dyn ChunkSource,
        policy: &RetentionPolicy,
    ) -> IndexResult<Vec<((String, usize), IndexState)>> {
        let mut done = Vec::with_capacity(batch.len());
        for item in batch {
            let mut state = IndexState::new();
            let mut policy = policy.fork();
            for file in item.entries {
                self.checkpoint("shard files")?;
                let result = source.read_chunks(&file.rel, file.language.as_deref());
                ingest_file(
                    &mut state,
                    &file.rel,
                    result,
                    &mut policy,
                    &self.postings,
                    None,
                )?;
            }
            debug!(
                "Shard {} part {}/{} done: {} files, {} chunks",
                item.shard.label,
                item.part_index,
                item.part_total,
                item.entries.len(),
                state.len()
            );
            done.push((item.merge_key(), state));
        }
        Ok(done)
    }

    fn accumulate_ordered(
        &self,
        source: &dyn ChunkSource,
        entries: &[FileEntry],
        policy: &RetentionPolicy,
    ) -> IndexResult<Accumulated> {
        let files: Vec<(String, Option<String>)> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                entry
                    .resolve_rel(None)
                    .map(|rel| (rel, entry.language.clone()))
                    .ok_or(ShardError::MissingPath { index })
            })
            .collect::<Result<_, _>>()?;

        let (max_items, max_rows, max_bytes) = self.settings.queue.ceilings();
        let queue = PendingQueue::new(max_items, max_rows, max_bytes);
        let next_file = AtomicUsize::new(0);
        let producers = self.settings.workers.threads.clamp(1, files.len().max(1));
        let (tx, rx) = crossbeam_channel::bounded::<Produced<'_>>(max_items + 1);
        debug!(
            "Ordered append of {} files with {producers} producers",
            files.len()
        );

        let state = std::thread::scope(|scope| {
            for _ in 0..producers {
                let tx = tx.clone();
                let (queue, next_file, files) = (&queue, &next_file, &files);
                scope.spawn(move || {
                    loop {
                        if self.is_cancelled() {
                            queue.close();
                            break;
                        }
                        let index = next_file.fetch_add(1, Ordering::Relaxed);
                        let Some((rel, language)) = files.get(index) else {
                            break;
                        };
                        let result = source.read_chunks(rel, language.as_deref());
                        let (rows, bytes) = match &result {
                            Ok(file) => (file.chunks.len(), file.manifest_bytes()),
                            Err(_) => (0, 0),
                        };
                        let Some(reservation) = queue.reserve(index, rows, bytes) else {
                            break;
                        };
                        let produced = Produced {
                            index,
                            result,
                            _reservation: reservation,
                        };
                        if tx.send(produced).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let appended = self.append_in_order(rx, &queue, &files, policy.fork());
            queue.close();
            appended
        })?;

        Ok(Accumulated {
            state,
            plan: Vec::new(),
            merges: 0,
            retention_downgraded: false,
        })
    }

    fn append_in_order(
        &self,
        rx: crossbeam_channel::Receiver<Produced<'_>>,
        queue: &PendingQueue,
        files: &[(String, Option<String>)],
        mut policy: RetentionPolicy,
    ) -> IndexResult<IndexState> {
        let mut state = IndexState::new();
        let mut pending: BTreeMap<usize, Produced<'_>> = BTreeMap::new();
        let mut next_index = 0;

        for produced in rx.iter() {
            self.checkpoint("append")?;
            pending.insert(produced.index, produced);

            while let Some(item) = pending.remove(&next_index) {
                let rel = &files[next_index].0;
                let mut working = IndexState::new();
                ingest_file(
                    &mut working,
                    rel,
                    item.result,
                    &mut policy,
                    &self.postings,
                    Some(&mut state),
                )?;
                state.merge_from(working)?;
                next_index += 1;
                queue.advance(next_index);
            }
        }

        self.checkpoint("append")?;
        if next_index != files.len() {
            return Err(IndexError::General(format!(
                "Ordered append stopped at file {next_index} of {}",
                files.len()
            )));
        }
        Ok(state)
    }

    /// Accumulate, merge and finalize.
    pub fn run(&self, source: &dyn ChunkSource) -> IndexResult<BuildOutput> {
        let mut stats = BuildStats::new();
        let Accumulated {
            mut state,
            plan,
            merges,
            retention_downgraded,
        } = self.accumulate(source)?;

        let scanned_files = std::mem::take(&mut state.scanned_files);
        let skipped_files = std::mem::take(&mut state.skipped_files);
        let file_info = std::mem::take(&mut state.file_info);
        let file_details = std::mem::take(&mut state.file_details);
        let file_relations = std::mem::take(&mut state.file_relations);
        let tokenization = state.tokenization.clone();
        let manifest = state.manifest.clone();

        stats.files_scanned = scanned_files.len();
        for skipped in &skipped_files {
            stats.add_skipped(skipped.path.clone(), skipped.reason.clone());
        }
        stats.chunks = state.len();
        stats.tokens = state.total_tokens();
        stats.shards = plan.len();
        stats.merges = merges;
        stats.retention_downgraded = retention_downgraded;

        let mut builder = PostingsBuilder::new(&self.postings, &self.settings.embeddings)
            .with_offload(self.offload);
        if let Some(cancel) = self.cancel {
            builder = builder.with_cancellation(cancel);
        }
        let postings = builder.build(state)?;

        warn_guard("Phrase", &postings.phrase_guard);
        warn_guard("Chargram", &postings.chargram_guard);
        if postings.phrase_guard.tripped() {
            stats.phrase_guard = Some(postings.phrase_guard.clone());
        }
        if postings.chargram_guard.tripped() {
            stats.chargram_guard = Some(postings.chargram_guard.clone());
        }
        stats.stop_timing();
        info!(
            "Build finished: {} files, {} chunks in {:.2}s",
            stats.files_scanned,
            stats.chunks,
            stats.elapsed.as_secs_f64()
        );

        Ok(BuildOutput {
            postings,
            stats,
            plan,
            scanned_files,
            skipped_files,
            file_info,
            file_details,
            file_relations,
            tokenization,
            manifest,
        })
    }
}
