//! Planner input: one candidate file.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// `rel` with `/` separators
pub fn normalize_rel(rel: &str) -> String {
    rel.replace('\\', "/")
}

/// A file handed to the shard planner.
///
/// Either `rel` or an `abs` path under the planning root must be present;
/// the planner rejects entries where neither resolves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs: Option<PathBuf>,

    #[serde(default)]
    pub bytes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<u64>,

    /// Language id assigned by discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl FileEntry {
    pub fn new(rel: impl Into<String>, bytes: u64) -> Self {
        Self {
            rel: Some(rel.into()),
            bytes,
            ..Self::default()
        }
    }

    pub fn with_lines(mut self, lines: u64) -> Self {
        self.lines = Some(lines);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_abs(mut self, abs: impl Into<PathBuf>) -> Self {
        self.abs = Some(abs.into());
        self
    }

    /// Repository-relative path with `/` separators.
    ///
    /// Falls back to `abs` stripped of `root` when `rel` is absent or empty.
    pub fn resolve_rel(&self, root: Option<&Path>) -> Option<String> {
        if let Some(rel) = self.rel.as_deref().filter(|rel| !rel.is_empty()) {
            return Some(normalize_rel(rel));
        }
        let stripped = self.abs.as_deref()?.strip_prefix(root?).ok()?;
        let parts: Vec<&str> = stripped
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Lowercased extension of the resolved path, with the dot
    pub fn extension(&self) -> Option<String> {
        let name = match self.rel.as_deref().filter(|rel| !rel.is_empty()) {
            Some(rel) => rel.rsplit('/').next()?.to_string(),
            None => self.abs.as_deref()?.file_name()?.to_str()?.to_string(),
        };
        let dot = name.rfind('.').filter(|&pos| pos > 0)?;
        Some(name[dot..].to_ascii_lowercase())
    }
}
