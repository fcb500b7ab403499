//! Configuration module for index construction.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SX_` and use double underscores
//! to separate nested levels:
//! - `SX_POSTINGS__PHRASE_MAX_N=3` sets `postings.phrase_max_n`
//! - `SX_RETENTION__MODE=sample` sets `retention.mode`
//! - `SX_WORKERS__THREADS=8` sets `workers.threads`

use crate::error::{IndexError, IndexResult};
use crate::types::Field;
use crate::vector::QuantizationParams;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest n-gram length accepted for phrases and chargrams.
pub const MAX_NGRAM_LEN: usize = 16;

const CONFIG_DIR: &str = ".shardex";
const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default)]
    pub postings: PostingsConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub shards: ShardsConfig,

    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Which token stream feeds phrase or chargram generation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// The chunk's whole token stream (`seq` when present)
    #[default]
    Full,
    /// Only the tokens of the configured low-cardinality fields
    Fields,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PostingsConfig {
    #[serde(default = "default_true")]
    pub enable_phrase_ngrams: bool,

    #[serde(default = "default_phrase_min_n")]
    pub phrase_min_n: usize,

    #[serde(default = "default_phrase_max_n")]
    pub phrase_max_n: usize,

    #[serde(default)]
    pub phrase_source: TokenSource,

    #[serde(default = "default_true")]
    pub enable_chargrams: bool,

    #[serde(default = "default_chargram_min_n")]
    pub chargram_min_n: usize,

    #[serde(default = "default_chargram_max_n")]
    pub chargram_max_n: usize,

    /// Words longer than this are skipped for chargrams (unset: no limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chargram_max_token_length: Option<usize>,

    #[serde(default = "default_chargram_source")]
    pub chargram_source: TokenSource,

    /// Fields read when a source selector is `fields`
    #[serde(default = "default_source_fields")]
    pub source_fields: Vec<Field>,

    /// Build per-field postings and lengths
    #[serde(default = "default_true")]
    pub fielded: bool,

    /// Stop admitting new phrase terms at this vocabulary size (0: unlimited).
    /// Applies to the merged vocabulary of a build, not to each shard.
    #[serde(default)]
    pub phrase_max_unique: usize,

    /// Stop emitting phrase n-grams for a chunk after this many (0: unlimited)
    #[serde(default)]
    pub phrase_max_per_chunk: usize,

    /// Same as `phrase_max_unique`, for chargrams
    #[serde(default)]
    pub chargram_max_unique: usize,

    #[serde(default)]
    pub chargram_max_per_chunk: usize,

    /// Drop chargrams whose document frequency exceeds this (0: keep all)
    #[serde(default)]
    pub chargram_max_df: usize,
}

/// How retained chunk tokens are kept after their postings are recorded.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    #[default]
    Auto,
    Full,
    Sample,
    None,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetentionConfig {
    #[serde(default)]
    pub mode: RetentionMode,

    /// Tokens kept per chunk in sample mode
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Auto mode starts at `full` only when the build has at most this many files
    #[serde(default = "default_retention_max_files")]
    pub max_files: usize,

    /// Cumulative token budget before auto mode downgrades to `sample`
    #[serde(default = "default_retention_max_tokens")]
    pub max_tokens: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ShardsConfig {
    /// Split the build into per-shard accumulators
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Index mode mixed into shard ids
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Directory components forming the shard's directory key
    #[serde(default = "default_dir_depth")]
    pub dir_depth: usize,

    /// Groups with fewer files are folded into a per-language `/_misc` shard
    #[serde(default = "default_min_files")]
    pub min_files: usize,

    /// Upper bound on the number of shards (0: unlimited)
    #[serde(default = "default_max_shards")]
    pub max_shards: usize,

    /// Groups above this byte total are split (0: unlimited)
    #[serde(default = "default_max_shard_bytes")]
    pub max_shard_bytes: u64,

    /// Groups above this line total are split (0: unlimited)
    #[serde(default = "default_max_shard_lines")]
    pub max_shard_lines: u64,

    /// Analysis stages that inflate per-file cost
    #[serde(default)]
    pub features: Vec<String>,

    /// Optional perf profile (JSON) used for cost estimation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Emit dense vector arrays
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fixed dimensionality (unset: inferred from the first vector)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<usize>,

    #[serde(default = "default_quant_min")]
    pub quant_min: f32,

    #[serde(default = "default_quant_max")]
    pub quant_max: f32,

    #[serde(default = "default_quant_levels")]
    pub quant_levels: u32,

    /// Vectors per offloaded quantization batch
    #[serde(default = "default_quant_batch_size")]
    pub batch_size: usize,

    /// Resubmissions of a batch whose offload reported `Unavailable`
    #[serde(default = "default_offload_retries")]
    pub offload_retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueueConfig {
    /// Files that may be tokenized ahead of the appender
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    #[serde(default = "default_rows_per_slot")]
    pub rows_per_slot: usize,

    #[serde(default = "default_bytes_per_slot")]
    pub bytes_per_slot: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkersConfig {
    /// Threads for shard workers and tokenization producers
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Route quantization and tokenization through the worker pool
    #[serde(default = "default_true")]
    pub offload: bool,

    #[serde(default = "default_offload_threads")]
    pub offload_threads: usize,

    /// Files larger than this are skipped by whole-file sources
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_phrase_min_n() -> usize {
    2
}
fn default_phrase_max_n() -> usize {
    4
}
fn default_chargram_min_n() -> usize {
    3
}
fn default_chargram_max_n() -> usize {
    5
}
fn default_chargram_source() -> TokenSource {
    TokenSource::Fields
}
fn default_source_fields() -> Vec<Field> {
    vec![Field::Name, Field::Doc]
}
fn default_sample_size() -> usize {
    32
}
fn default_retention_max_files() -> usize {
    5000
}
fn default_retention_max_tokens() -> u64 {
    5_000_000
}
fn default_mode() -> String {
    "code".to_string()
}
fn default_dir_depth() -> usize {
    1
}
fn default_min_files() -> usize {
    3
}
fn default_max_shards() -> usize {
    64
}
fn default_max_shard_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_max_shard_lines() -> u64 {
    200_000
}
fn default_quant_min() -> f32 {
    -1.0
}
fn default_quant_max() -> f32 {
    1.0
}
fn default_quant_levels() -> u32 {
    256
}
fn default_quant_batch_size() -> usize {
    128
}
fn default_offload_retries() -> u32 {
    2
}
fn default_max_pending() -> usize {
    (num_cpus::get() * 2).max(4)
}
fn default_rows_per_slot() -> usize {
    300
}
fn default_bytes_per_slot() -> u64 {
    12 * 1024 * 1024
}
fn default_threads() -> usize {
    num_cpus::get()
}
fn default_offload_threads() -> usize {
    (num_cpus::get() / 2).max(1)
}
fn default_max_file_bytes() -> u64 {
    4 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            postings: PostingsConfig::default(),
            retention: RetentionConfig::default(),
            shards: ShardsConfig::default(),
            embeddings: EmbeddingConfig::default(),
            queue: QueueConfig::default(),
            workers: WorkersConfig::default(),
        }
    }
}

impl Default for PostingsConfig {
    fn default() -> Self {
        Self {
            enable_phrase_ngrams: true,
            phrase_min_n: default_phrase_min_n(),
            phrase_max_n: default_phrase_max_n(),
            phrase_source: TokenSource::Full,
            enable_chargrams: true,
            chargram_min_n: default_chargram_min_n(),
            chargram_max_n: default_chargram_max_n(),
            chargram_max_token_length: None,
            chargram_source: default_chargram_source(),
            source_fields: default_source_fields(),
            fielded: true,
            phrase_max_unique: 0,
            phrase_max_per_chunk: 0,
            chargram_max_unique: 0,
            chargram_max_per_chunk: 0,
            chargram_max_df: 0,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            mode: RetentionMode::Auto,
            sample_size: default_sample_size(),
            max_files: default_retention_max_files(),
            max_tokens: default_retention_max_tokens(),
        }
    }
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_mode(),
            dir_depth: default_dir_depth(),
            min_files: default_min_files(),
            max_shards: default_max_shards(),
            max_shard_bytes: default_max_shard_bytes(),
            max_shard_lines: default_max_shard_lines(),
            features: Vec::new(),
            profile_path: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dims: None,
            quant_min: default_quant_min(),
            quant_max: default_quant_max(),
            quant_levels: default_quant_levels(),
            batch_size: default_quant_batch_size(),
            offload_retries: default_offload_retries(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            rows_per_slot: default_rows_per_slot(),
            bytes_per_slot: default_bytes_per_slot(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            offload: true,
            offload_threads: default_offload_threads(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl PostingsConfig {
    /// Clamp ranges into a usable shape.
    ///
    /// Never fails: out-of-range values are pulled to the nearest safe value.
    pub fn normalized(&self) -> Self {
        let (phrase_min_n, phrase_max_n) = clamp_range(self.phrase_min_n, self.phrase_max_n);
        let (chargram_min_n, chargram_max_n) =
            clamp_range(self.chargram_min_n, self.chargram_max_n);

        let mut source_fields: Vec<Field> = Vec::with_capacity(self.source_fields.len());
        for field in &self.source_fields {
            if !source_fields.contains(field) {
                source_fields.push(*field);
            }
        }
        if source_fields.is_empty() {
            source_fields = default_source_fields();
        }

        Self {
            phrase_min_n,
            phrase_max_n,
            chargram_min_n,
            chargram_max_n,
            chargram_max_token_length: self.chargram_max_token_length.map(|len| len.max(2)),
            source_fields,
            ..self.clone()
        }
    }
}

fn clamp_range(min: usize, max: usize) -> (usize, usize) {
    let min = min.clamp(1, MAX_NGRAM_LEN);
    let max = max.clamp(min, MAX_NGRAM_LEN);
    (min, max)
}

impl EmbeddingConfig {
    /// Validated quantization parameters.
    pub fn quantization(&self) -> IndexResult<QuantizationParams> {
        if !self.quant_min.is_finite() || !self.quant_max.is_finite() {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "embeddings quantization range must be finite, got [{}, {}]",
                    self.quant_min, self.quant_max
                ),
            });
        }
        if self.quant_min >= self.quant_max {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "embeddings.quant_min ({}) must be below embeddings.quant_max ({})",
                    self.quant_min, self.quant_max
                ),
            });
        }
        if !(2..=256).contains(&self.quant_levels) {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "embeddings.quant_levels must be within 2..=256, got {}",
                    self.quant_levels
                ),
            });
        }
        Ok(QuantizationParams {
            min: self.quant_min,
            max: self.quant_max,
            levels: self.quant_levels,
        })
    }
}

impl QueueConfig {
    /// Ceilings for the pending queue as `(count, rows, bytes)`
    pub fn ceilings(&self) -> (usize, usize, u64) {
        let slots = self.max_pending.max(1);
        (
            slots,
            slots.saturating_mul(self.rows_per_slot.max(1)),
            (slots as u64).saturating_mul(self.bytes_per_slot.max(1)),
        )
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring `SX_` overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscore stays
            .merge(Env::prefixed("SX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a `.shardex` directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where `.shardex` is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}
