#![allow(dead_code)]

use shardex::{ChunkRecord, JsonlChunkSource, Settings};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn add_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.dir.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn tokens(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

pub fn record(file: &str, words: &[&str]) -> ChunkRecord {
    ChunkRecord::new(file, tokens(words))
}

/// A chunk whose tokens are `prefix0 .. prefix{count-1}`
pub fn long_record(file: &str, prefix: &str, count: usize) -> ChunkRecord {
    ChunkRecord::new(file, (0..count).map(|i| format!("{prefix}{i}")).collect())
}

pub fn to_jsonl(records: &[ChunkRecord]) -> String {
    records
        .iter()
        .map(|r| serde_json::to_string(r).expect("Failed to serialize record"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn jsonl_source(records: &[ChunkRecord]) -> JsonlChunkSource {
    JsonlChunkSource::from_reader(Cursor::new(to_jsonl(records))).expect("Failed to parse chunks")
}

/// Defaults with a small, fixed worker count and no offload pool
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.workers.threads = 2;
    settings.workers.offload = false;
    settings
}

pub mod corpus {
    use super::record;
    use shardex::ChunkRecord;

    /// Six files over two directories and two languages
    pub fn mixed_repo() -> Vec<ChunkRecord> {
        vec![
            record("src/parser.rs", &["parse", "token", "stream"]),
            record("src/parser.rs", &["parse", "error", "recover"]),
            record("src/lexer.rs", &["lex", "token", "span"]),
            record("src/ast.rs", &["node", "span", "visit"]),
            record("lib/util.py", &["def", "helper", "token"]),
            record("lib/io.py", &["def", "read", "stream"]),
            record("lib/cli.py", &["def", "main", "parse"]),
        ]
    }
}
