//! Cost estimation for shard planning.
//!
//! A `PerfProfile` holds measured per-file costs by language and size bucket.
//! Planning without a profile (or without a matching language) degrades to
//! using line counts as the cost.

use crate::error::{IndexError, IndexResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Profile key consulted when a language has no entry of its own
pub const DEFAULT_LANGUAGE: &str = "_default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    Xs,
    S,
    M,
    L,
    Xl,
    Xxl,
}

impl SizeBucket {
    pub const ALL: [SizeBucket; 6] = [
        SizeBucket::Xs,
        SizeBucket::S,
        SizeBucket::M,
        SizeBucket::L,
        SizeBucket::Xl,
        SizeBucket::Xxl,
    ];

    pub fn for_bytes(bytes: u64) -> Self {
        const KIB: u64 = 1024;
        match bytes {
            b if b <= 4 * KIB => SizeBucket::Xs,
            b if b <= 16 * KIB => SizeBucket::S,
            b if b <= 64 * KIB => SizeBucket::M,
            b if b <= 256 * KIB => SizeBucket::L,
            b if b <= 1024 * KIB => SizeBucket::Xl,
            _ => SizeBucket::Xxl,
        }
    }

    fn rank(self) -> usize {
        self as usize
    }
}

/// Linear cost model for one (language, bucket) cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    #[serde(default)]
    pub overhead_ms: f64,
    #[serde(default)]
    pub byte_cost_ms: f64,
    #[serde(default)]
    pub line_cost_ms: f64,
}

impl CostModel {
    pub fn cost(&self, bytes: u64, lines: u64) -> f64 {
        self.overhead_ms + self.byte_cost_ms * bytes as f64 + self.line_cost_ms * lines as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfProfile {
    #[serde(default)]
    pub languages: BTreeMap<String, BTreeMap<SizeBucket, CostModel>>,
}

impl PerfProfile {
    /// Load a JSON profile from disk
    pub fn load(path: &Path) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| IndexError::ConfigError {
            reason: format!("invalid perf profile {}: {e}", path.display()),
        })
    }

    pub fn insert(&mut self, language: &str, bucket: SizeBucket, model: CostModel) {
        self.languages
            .entry(language.to_string())
            .or_default()
            .insert(bucket, model);
    }

    /// Cost model for `language` at `bucket`.
    ///
    /// Tries the exact bucket, then the nearest bucket the language has
    /// (ties go to the smaller bucket), then the same two steps for
    /// `_default`.
    pub fn lookup<'a>(&'a self, language: &str, bucket: SizeBucket) -> Option<&'a CostModel> {
        let nearest = |models: &'a BTreeMap<SizeBucket, CostModel>| {
            models
                .iter()
                .min_by_key(|(candidate, _)| {
                    (candidate.rank().abs_diff(bucket.rank()), candidate.rank())
                })
                .map(|(_, model)| model)
        };
        self.languages
            .get(language)
            .and_then(nearest)
            .or_else(|| self.languages.get(DEFAULT_LANGUAGE).and_then(nearest))
    }

    /// Estimated cost of one file; raw line count when no model applies
    pub fn file_cost(&self, language: &str, bytes: u64, lines: u64) -> f64 {
        match self.lookup(language, SizeBucket::for_bytes(bytes)) {
            Some(model) => model.cost(bytes, lines),
            None => lines as f64,
        }
    }
}

bitflags! {
    /// Optional analysis stages that make every file more expensive
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AnalysisFeatures: u8 {
        const RELATIONS   = 0b00001;
        const FLOW        = 0b00010;
        const TREE_SITTER = 0b00100;
        const TOOLING     = 0b01000;
        const EMBEDDINGS  = 0b10000;
    }
}

impl AnalysisFeatures {
    const WEIGHTS: [(AnalysisFeatures, f64); 5] = [
        (AnalysisFeatures::RELATIONS, 0.15),
        (AnalysisFeatures::FLOW, 0.10),
        (AnalysisFeatures::TREE_SITTER, 0.10),
        (AnalysisFeatures::TOOLING, 0.10),
        (AnalysisFeatures::EMBEDDINGS, 0.20),
    ];

    /// Parse feature names; unknown names are logged and ignored
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut features = AnalysisFeatures::empty();
        for name in names {
            let flag = match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "relations" => AnalysisFeatures::RELATIONS,
                "flow" => AnalysisFeatures::FLOW,
                "tree-sitter" | "tree_sitter" | "treesitter" => AnalysisFeatures::TREE_SITTER,
                "tooling" => AnalysisFeatures::TOOLING,
                "embeddings" => AnalysisFeatures::EMBEDDINGS,
                other => {
                    warn!("Ignoring unknown analysis feature '{other}'");
                    continue;
                }
            };
            features |= flag;
        }
        features
    }

    /// Cost multiplier: one plus the weights of every enabled feature
    pub fn multiplier(&self) -> f64 {
        1.0 + Self::WEIGHTS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, weight)| weight)
            .sum::<f64>()
    }
}
