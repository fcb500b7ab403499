//! Cost-aware partitioning of a file set into shards.
//!
//! Files are grouped by `(directory key, language key)`. Small groups fold
//! into a per-language `/_misc` shard, oversized groups split into parts, and
//! the shard count is capped by folding the cheapest shards together. Every
//! step is deterministic: the same input always produces the same shards
//! with the same ids.

use super::entry::FileEntry;
use super::profile::{AnalysisFeatures, PerfProfile};
use crate::config::ShardsConfig;
use crate::error::{ShardError, ShardResult};
use crate::indexing::calculate_hash;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Bytes per line assumed when no line count is known
pub const ESTIMATED_BYTES_PER_LINE: u64 = 40;

/// Directory keys never start with `/`, so no real directory can claim this one
const MISC_DIR: &str = "/_misc";
const ROOT_DIR: &str = ".";
const UNKNOWN_LANG: &str = "unknown";

/// A file placed into a shard, with its resolved path and cost
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedFile {
    pub rel: String,
    /// Position of the file in the planner input
    pub index: usize,
    pub bytes: u64,
    pub lines: u64,
    pub cost_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shard {
    pub id: String,
    pub label: String,
    pub dir: String,
    pub lang: String,
    pub entries: Vec<PlannedFile>,
    pub byte_count: u64,
    pub line_count: u64,
    pub cost_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_from: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,
}

impl Shard {
    fn new(mode: &str, dir: String, lang: String, label: String) -> Self {
        Self {
            id: shard_id(mode, &label),
            label,
            dir,
            lang,
            entries: Vec::new(),
            byte_count: 0,
            line_count: 0,
            cost_ms: 0.0,
            split_from: None,
            merged_from: Vec::new(),
        }
    }

    fn push(&mut self, file: PlannedFile) {
        self.byte_count += file.bytes;
        self.line_count += file.lines;
        self.cost_ms += file.cost_ms;
        self.entries.push(file);
    }

    fn absorb(&mut self, other: Shard) {
        self.merged_from.push(other.label);
        self.merged_from.extend(other.merged_from);
        for file in other.entries {
            self.push(file);
        }
        self.entries.sort_by(|a, b| a.rel.cmp(&b.rel));
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }
}

/// Deterministic shard id: hash of `"<mode>:<label>"`, first 16 hex digits
pub fn shard_id(mode: &str, label: &str) -> String {
    let mut hash = calculate_hash(&format!("{mode}:{label}"));
    hash.truncate(16);
    hash
}

/// Everything the planner needs besides the files.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions<'a> {
    pub mode: String,
    pub dir_depth: usize,
    pub min_files: usize,
    /// 0 means unlimited
    pub max_shards: usize,
    pub max_shard_bytes: u64,
    pub max_shard_lines: u64,
    pub features: AnalysisFeatures,
    pub profile: Option<&'a PerfProfile>,
    pub line_counts: Option<&'a HashMap<String, u64>>,
    pub root: Option<&'a Path>,
}

impl<'a> PlanOptions<'a> {
    pub fn from_config(config: &ShardsConfig) -> Self {
        Self {
            mode: config.mode.clone(),
            dir_depth: config.dir_depth,
            min_files: config.min_files,
            max_shards: config.max_shards,
            max_shard_bytes: config.max_shard_bytes,
            max_shard_lines: config.max_shard_lines,
            features: AnalysisFeatures::from_names(&config.features),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: Option<&'a PerfProfile>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_line_counts(mut self, line_counts: &'a HashMap<String, u64>) -> Self {
        self.line_counts = Some(line_counts);
        self
    }

    pub fn with_root(mut self, root: &'a Path) -> Self {
        self.root = Some(root);
        self
    }
}

/// Directory key: the first `depth` directory components, `.` for root files
fn dir_key(rel: &str, depth: usize) -> String {
    let mut components: Vec<&str> = rel.split('/').filter(|c| !c.is_empty()).collect();
    components.pop();
    components.truncate(depth);
    if components.is_empty() {
        ROOT_DIR.to_string()
    } else {
        components.join("/")
    }
}

fn lang_key(entry: &FileEntry) -> String {
    entry
        .language
        .as_deref()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_ascii_lowercase)
        .or_else(|| entry.extension())
        .unwrap_or_else(|| UNKNOWN_LANG.to_string())
}

fn resolve_lines(entry: &FileEntry, rel: &str, options: &PlanOptions<'_>) -> u64 {
    if let Some(lines) = entry.lines.filter(|&lines| lines > 0) {
        return lines;
    }
    if let Some(&lines) = options.line_counts.and_then(|counts| counts.get(rel)) {
        return lines;
    }
    entry.bytes.div_ceil(ESTIMATED_BYTES_PER_LINE)
}

/// Split a group into consecutive parts within the byte and line limits.
fn split_group(shard: Shard, mode: &str, max_bytes: u64, max_lines: u64) -> Vec<Shard> {
    let over_bytes = max_bytes > 0 && shard.byte_count > max_bytes;
    let over_lines = max_lines > 0 && shard.line_count > max_lines;
    if !over_bytes && !over_lines {
        return vec![shard];
    }

    let mut chunks: Vec<Vec<PlannedFile>> = vec![Vec::new()];
    let (mut bytes, mut lines) = (0u64, 0u64);
    for file in shard.entries {
        let exceeds = (max_bytes > 0 && bytes + file.bytes > max_bytes)
            || (max_lines > 0 && lines + file.lines > max_lines);
        if exceeds && chunks.last().is_some_and(|part| !part.is_empty()) {
            chunks.push(Vec::new());
            bytes = 0;
            lines = 0;
        }
        bytes += file.bytes;
        lines += file.lines;
        if let Some(part) = chunks.last_mut() {
            part.push(file);
        }
    }

    if chunks.len() == 1 {
        let mut whole = Shard::new(mode, shard.dir, shard.lang, shard.label);
        whole.merged_from = shard.merged_from;
        for file in chunks.into_iter().flatten() {
            whole.push(file);
        }
        return vec![whole];
    }

    debug!("Splitting {} into {} parts", shard.label, chunks.len());
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, files)| {
            let label = format!("{}#{}", shard.label, i + 1);
            let mut part = Shard::new(mode, shard.dir.clone(), shard.lang.clone(), label);
            part.split_from = Some(shard.label.clone());
            part.merged_from = shard.merged_from.clone();
            for file in files {
                part.push(file);
            }
            part
        })
        .collect()
}

/// Partition `entries` into shards.
///
/// Fails with `ShardError::MissingPath` when an entry has neither a relative
/// path nor an absolute path under `options.root`.
pub fn plan_shards(entries: &[FileEntry], options: &PlanOptions<'_>) -> ShardResult<Vec<Shard>> {
    let multiplier = options.features.multiplier();
    let mode = options.mode.as_str();

    let mut groups: BTreeMap<(String, String), Vec<PlannedFile>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let rel = entry
            .resolve_rel(options.root)
            .ok_or(ShardError::MissingPath { index })?;
        let lang = lang_key(entry);
        let lines = resolve_lines(entry, &rel, options);
        let base_cost = match options.profile {
            Some(profile) => profile.file_cost(&lang, entry.bytes, lines),
            None => lines as f64,
        };
        let dir = dir_key(&rel, options.dir_depth);
        groups.entry((dir, lang)).or_default().push(PlannedFile {
            rel,
            index,
            bytes: entry.bytes,
            lines,
            cost_ms: base_cost * multiplier,
            language: entry.language.clone(),
        });
    }

    // Fold small groups into per-language misc shards
    let mut shards: Vec<Shard> = Vec::new();
    let mut misc: BTreeMap<String, Shard> = BTreeMap::new();
    for ((dir, lang), mut files) in groups {
        files.sort_by(|a, b| a.rel.cmp(&b.rel));
        let label = format!("{dir}/{lang}");
        if files.len() < options.min_files {
            let target = misc.entry(lang.clone()).or_insert_with(|| {
                Shard::new(
                    mode,
                    MISC_DIR.to_string(),
                    lang.clone(),
                    format!("{MISC_DIR}/{lang}"),
                )
            });
            target.merged_from.push(label);
            for file in files {
                target.push(file);
            }
            continue;
        }
        let mut shard = Shard::new(mode, dir, lang, label);
        for file in files {
            shard.push(file);
        }
        shards.push(shard);
    }
    for (_, mut shard) in misc {
        shard.entries.sort_by(|a, b| a.rel.cmp(&b.rel));
        shards.push(shard);
    }

    let mut shards: Vec<Shard> = shards
        .into_iter()
        .flat_map(|shard| {
            split_group(
                shard,
                mode,
                options.max_shard_bytes,
                options.max_shard_lines,
            )
        })
        .collect();

    if options.max_shards > 0 {
        while shards.len() > options.max_shards {
            shards.sort_by(|a, b| {
                a.cost_ms
                    .total_cmp(&b.cost_ms)
                    .then_with(|| a.label.cmp(&b.label))
            });
            let cheapest = shards.remove(0);
            debug!("Folding {} into {}", cheapest.label, shards[0].label);
            shards[0].absorb(cheapest);
        }
    }

    shards.sort_by(|a, b| a.label.cmp(&b.label));

    let files: usize = shards.iter().map(Shard::file_count).sum();
    let lines: u64 = shards.iter().map(|s| s.line_count).sum();
    info!(
        "Shard plan: {} shards, {files} files, {lines} lines",
        shards.len()
    );
    Ok(shards)
}
