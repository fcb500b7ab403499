//! Where chunks come from.
//!
//! A `ChunkSource` lists the files it can serve and hands out the chunk
//! records of one file at a time. Per-file failures come back as
//! `SourceError` and end up as skip reasons; they never abort a build.

use super::chunk::ChunkRecord;
use super::file_info::{FileInfo, SkipReason, count_lines};
use crate::error::{IndexError, IndexResult, SourceError};
use crate::offload::{WorkOffload, split_identifiers};
use crate::sharding::{FileEntry, normalize_rel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Chunks of one file plus what is known about the file itself.
#[derive(Debug, Clone)]
pub struct FileChunks {
    pub info: FileInfo,
    pub chunks: Vec<ChunkRecord>,
}

impl FileChunks {
    /// Bytes accounted for this file in the chunk manifest
    pub fn manifest_bytes(&self) -> u64 {
        self.chunks.iter().map(ChunkRecord::approx_bytes).sum()
    }
}

pub trait ChunkSource: Send + Sync {
    /// Every file this source can serve, in source order
    fn entries(&self) -> Vec<FileEntry>;

    /// Chunk records of `rel`, in chunk order
    fn read_chunks(&self, rel: &str, language: Option<&str>) -> Result<FileChunks, SourceError>;
}

impl From<SourceError> for SkipReason {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Io { source, .. } => SkipReason::Unreadable(source.to_string()),
            SourceError::Malformed { .. } => SkipReason::Malformed(err.to_string()),
            SourceError::InvalidUtf8 => SkipReason::InvalidUtf8,
            SourceError::TooLarge { .. } => SkipReason::TooLarge,
        }
    }
}

/// Language id carried by a record's pass-through metadata
fn record_language(record: &ChunkRecord) -> Option<String> {
    ["lang", "language", "languageId"]
        .iter()
        .find_map(|key| record.metadata.get(*key)?.as_str())
        .map(str::to_string)
}

#[derive(Debug, Default)]
struct JsonlFile {
    bytes: u64,
    language: Option<String>,
    records: Option<Vec<ChunkRecord>>,
}

/// Pre-tokenized chunk records, one JSON object per line.
///
/// Records are grouped by their `file` key in first-seen order, with `\\`
/// separators rewritten to `/` so keys match planned paths. Each file's
/// records are handed out once; a second read of the same file yields no
/// chunks.
#[derive(Debug)]
pub struct JsonlChunkSource {
    order: Vec<String>,
    files: Mutex<HashMap<String, JsonlFile>>,
}

impl JsonlChunkSource {
    /// Read and group every record of `path`.
    ///
    /// A malformed line fails the whole source: the records cannot be
    /// attributed to a file.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let file = std::fs::File::open(path).map_err(|source| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|err| IndexError::ChunkSource {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, SourceError> {
        let mut order = Vec::new();
        let mut files: HashMap<String, JsonlFile> = HashMap::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| SourceError::Io {
                path: PathBuf::from("<chunks>"),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut record: ChunkRecord =
                serde_json::from_str(trimmed).map_err(|e| SourceError::Malformed {
                    line: number + 1,
                    reason: e.to_string(),
                })?;
            if record.file.is_empty() {
                return Err(SourceError::Malformed {
                    line: number + 1,
                    reason: "missing 'file'".to_string(),
                });
            }
            record.file = normalize_rel(&record.file);

            let entry = files.entry(record.file.clone()).or_insert_with(|| {
                order.push(record.file.clone());
                JsonlFile {
                    records: Some(Vec::new()),
                    ..JsonlFile::default()
                }
            });
            entry.bytes += trimmed.len() as u64;
            if entry.language.is_none() {
                entry.language = record_language(&record);
            }
            if let Some(records) = entry.records.as_mut() {
                records.push(record);
            }
        }

        debug!("Loaded chunk records for {} files", order.len());
        Ok(Self {
            order,
            files: Mutex::new(files),
        })
    }

    pub fn file_count(&self) -> usize {
        self.order.len()
    }
}

impl ChunkSource for JsonlChunkSource {
    fn entries(&self) -> Vec<FileEntry> {
        let files = self.files.lock();
        self.order
            .iter()
            .filter_map(|rel| {
                let file = files.get(rel)?;
                let mut entry = FileEntry::new(rel.clone(), file.bytes);
                entry.language = file.language.clone();
                Some(entry)
            })
            .collect()
    }

    fn read_chunks(&self, rel: &str, language: Option<&str>) -> Result<FileChunks, SourceError> {
        let mut files = self.files.lock();
        let Some(file) = files.get_mut(&normalize_rel(rel)) else {
            return Err(SourceError::Io {
                path: PathBuf::from(rel),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no chunk records"),
            });
        };
        let chunks = file.records.take().unwrap_or_default();
        let language = language.map(str::to_string).or_else(|| file.language.clone());
        Ok(FileChunks {
            info: FileInfo::new(rel, file.bytes, 0).with_language(language),
            chunks,
        })
    }
}

/// Reads whole files under a root and turns each into a single chunk.
///
/// Text is tokenized through the offload when one is configured. An
/// `Unavailable` offload is retried up to `offload_retries` times; any other
/// error, or running out of retries, falls back to the local identifier
/// splitter.
pub struct WholeFileSource<'a> {
    root: PathBuf,
    files: Vec<String>,
    max_file_bytes: u64,
    offload: Option<&'a dyn WorkOffload>,
    offload_retries: u32,
    fallback_warned: AtomicBool,
}

impl<'a> WholeFileSource<'a> {
    pub fn new(root: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files,
            max_file_bytes: u64::MAX,
            offload: None,
            offload_retries: 0,
            fallback_warned: AtomicBool::new(false),
        }
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn with_offload(mut self, offload: Option<&'a dyn WorkOffload>) -> Self {
        self.offload = offload;
        self
    }

    pub fn with_offload_retries(mut self, retries: u32) -> Self {
        self.offload_retries = retries;
        self
    }

    fn tokenize(&self, text: &str, language: Option<&str>) -> Vec<String> {
        let Some(offload) = self.offload else {
            return split_identifiers(text);
        };
        let mut attempt = 0;
        loop {
            match offload.submit_tokenize(text, language) {
                Ok(tokens) => return tokens,
                Err(e) if e.is_retryable() && attempt < self.offload_retries => attempt += 1,
                Err(e) => {
                    if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                        warn!("Tokenization offload failed, tokenizing locally: {e}");
                    }
                    return split_identifiers(text);
                }
            }
        }
    }
}

impl ChunkSource for WholeFileSource<'_> {
    fn entries(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .map(|rel| {
                let abs = self.root.join(rel);
                let bytes = std::fs::metadata(&abs).map(|m| m.len()).unwrap_or(0);
                FileEntry::new(rel.clone(), bytes).with_abs(abs)
            })
            .collect()
    }

    fn read_chunks(&self, rel: &str, language: Option<&str>) -> Result<FileChunks, SourceError> {
        let path = self.root.join(rel);
        let io_error = |source| SourceError::Io {
            path: path.clone(),
            source,
        };

        let size = std::fs::metadata(&path).map_err(io_error)?.len();
        if size > self.max_file_bytes {
            return Err(SourceError::TooLarge {
                limit: self.max_file_bytes,
            });
        }
        let bytes = std::fs::read(&path).map_err(io_error)?;
        let content = String::from_utf8(bytes).map_err(|_| SourceError::InvalidUtf8)?;

        let language = language.map(str::to_string).or_else(|| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
        });
        let info = FileInfo::from_content(rel, &content).with_language(language.clone());
        if content.trim().is_empty() {
            return Ok(FileChunks {
                info,
                chunks: Vec::new(),
            });
        }

        let mut record = ChunkRecord::new(rel, self.tokenize(&content, language.as_deref()));
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            record.fields.name = split_identifiers(stem);
        }
        record
            .metadata
            .insert("lines".to_string(), count_lines(&content).into());

        Ok(FileChunks {
            info,
            chunks: vec![record],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OffloadError;
    use crate::vector::QuantizationParams;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const JSONL: &str = r#"
{"file":"src/a.rs","tokens":["parse","args"],"lang":"rust"}
{"file":"src/b.py","tokens":["main"]}
{"file":"src/a.rs","tokens":["run"],"kind":"fn"}
"#;

    #[test]
    fn test_jsonl_groups_by_file_in_first_seen_order() {
        let source = JsonlChunkSource::from_reader(Cursor::new(JSONL)).unwrap();
        let entries = source.entries();
        let rels: Vec<&str> = entries.iter().filter_map(|e| e.rel.as_deref()).collect();
        assert_eq!(rels, vec!["src/a.rs", "src/b.py"]);
        assert_eq!(entries[0].language.as_deref(), Some("rust"));

        let chunks = source.read_chunks("src/a.rs", None).unwrap();
        assert_eq!(chunks.chunks.len(), 2);
        assert_eq!(chunks.chunks[1].metadata["kind"], "fn");
        assert_eq!(chunks.info.language.as_deref(), Some("rust"));

        // Records are handed out once
        assert!(source.read_chunks("src/a.rs", None).unwrap().chunks.is_empty());
    }

    #[test]
    fn test_jsonl_backslash_paths_match_planned_paths() {
        let lines = r#"
{"file":"src\\win\\b.rs","tokens":["one"]}
{"file":"src/win/b.rs","tokens":["two"]}
"#;
        let source = JsonlChunkSource::from_reader(Cursor::new(lines)).unwrap();
        assert_eq!(source.file_count(), 1);

        let entry = &source.entries()[0];
        let planned = entry.resolve_rel(None).unwrap();
        assert_eq!(planned, "src/win/b.rs");

        let file = source.read_chunks(&planned, None).unwrap();
        assert_eq!(file.chunks.len(), 2);
        assert_eq!(file.chunks[0].file, "src/win/b.rs");
    }

    #[test]
    fn test_jsonl_malformed_line() {
        let err = JsonlChunkSource::from_reader(Cursor::new("{\"file\":\"a\"}\nnot json\n"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Malformed { line: 2, .. }));

        let err = JsonlChunkSource::from_reader(Cursor::new("{\"tokens\":[]}\n")).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_skip_reason_from_source_error() {
        assert_eq!(
            SkipReason::from(SourceError::TooLarge { limit: 5 }),
            SkipReason::TooLarge
        );
        assert_eq!(SkipReason::from(SourceError::InvalidUtf8), SkipReason::InvalidUtf8);
    }

    #[test]
    fn test_whole_file_source_reads_and_tokenizes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("parseConfig.rs"), "fn load_settings() {}\n").unwrap();

        let source = WholeFileSource::new(dir.path(), vec!["parseConfig.rs".to_string()]);
        let entries = source.entries();
        assert_eq!(entries[0].bytes, 22);

        let file = source.read_chunks("parseConfig.rs", None).unwrap();
        let chunk = &file.chunks[0];
        assert_eq!(chunk.tokens, vec!["fn", "load", "settings"]);
        assert_eq!(chunk.fields.name, vec!["parse", "config"]);
        assert_eq!(file.info.language.as_deref(), Some("rs"));
        assert_eq!(file.info.lines, 1);
        assert!(file.info.hash.is_some());
    }

    #[test]
    fn test_whole_file_source_errors() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();
        std::fs::write(dir.path().join("bin.dat"), b"\xff\xfe\x00").unwrap();
        std::fs::write(dir.path().join("blank.txt"), "  \n").unwrap();

        let source = WholeFileSource::new(dir.path(), Vec::new()).with_max_file_bytes(32);
        assert!(matches!(
            source.read_chunks("big.txt", None),
            Err(SourceError::TooLarge { limit: 32 })
        ));
        assert!(matches!(
            source.read_chunks("bin.dat", None),
            Err(SourceError::InvalidUtf8)
        ));
        assert!(matches!(
            source.read_chunks("missing.txt", None),
            Err(SourceError::Io { .. })
        ));
        assert!(source.read_chunks("blank.txt", None).unwrap().chunks.is_empty());
    }

    /// Answers `Unavailable` for the first `busy_calls` tokenize requests
    struct BusyTokenizer {
        busy_calls: usize,
        calls: AtomicUsize,
    }

    impl WorkOffload for BusyTokenizer {
        fn submit_quantize_batch(
            &self,
            _vectors: &[Vec<f32>],
            _params: QuantizationParams,
        ) -> Result<Vec<Vec<u8>>, OffloadError> {
            Err(OffloadError::Failed {
                reason: "unused".into(),
            })
        }

        fn submit_tokenize(
            &self,
            _text: &str,
            _language_hint: Option<&str>,
        ) -> Result<Vec<String>, OffloadError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.busy_calls {
                return Err(OffloadError::Unavailable {
                    reason: "queue full".into(),
                });
            }
            Ok(vec!["remote".to_string()])
        }
    }

    #[test]
    fn test_unavailable_tokenizer_is_retried() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "getUserName").unwrap();
        let offload = BusyTokenizer {
            busy_calls: 2,
            calls: AtomicUsize::new(0),
        };

        let source = WholeFileSource::new(dir.path(), Vec::new())
            .with_offload(Some(&offload))
            .with_offload_retries(2);
        let file = source.read_chunks("a.rs", None).unwrap();
        assert_eq!(file.chunks[0].tokens, vec!["remote"]);
        assert_eq!(offload.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_retries_fall_back_locally() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "getUserName").unwrap();
        let offload = BusyTokenizer {
            busy_calls: usize::MAX,
            calls: AtomicUsize::new(0),
        };

        let source = WholeFileSource::new(dir.path(), Vec::new())
            .with_offload(Some(&offload))
            .with_offload_retries(1);
        let file = source.read_chunks("a.rs", None).unwrap();
        assert_eq!(file.chunks[0].tokens, vec!["get", "user", "name"]);
        assert_eq!(offload.calls.load(Ordering::SeqCst), 2);
    }

    struct BrokenTokenizer;

    impl WorkOffload for BrokenTokenizer {
        fn submit_quantize_batch(
            &self,
            _vectors: &[Vec<f32>],
            _params: QuantizationParams,
        ) -> Result<Vec<Vec<u8>>, OffloadError> {
            Err(OffloadError::Failed {
                reason: "unused".into(),
            })
        }

        fn submit_tokenize(
            &self,
            _text: &str,
            _language_hint: Option<&str>,
        ) -> Result<Vec<String>, OffloadError> {
            Err(OffloadError::Unavailable {
                reason: "down".into(),
            })
        }
    }

    #[test]
    fn test_offload_failure_falls_back_to_local_tokenizer() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.js"), "getUserName").unwrap();
        let offload = BrokenTokenizer;

        let source = WholeFileSource::new(dir.path(), Vec::new()).with_offload(Some(&offload));
        let file = source.read_chunks("a.js", Some("javascript")).unwrap();
        assert_eq!(file.chunks[0].tokens, vec!["get", "user", "name"]);
        assert_eq!(file.info.language.as_deref(), Some("javascript"));
    }
}
