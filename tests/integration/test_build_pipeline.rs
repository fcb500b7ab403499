//! End-to-end builds through `IndexPipeline`.

use crate::common::{TestProject, corpus, jsonl_source, long_record, record, test_settings};
use shardex::config::RetentionMode;
use shardex::indexing::SkipReason;
use shardex::{Field, IndexPipeline, JsonlChunkSource, WholeFileSource};
use std::io::Cursor;

#[test]
fn test_bm25_switches_at_800_tokens() {
    let mut settings = test_settings();
    settings.shards.enabled = false;

    let long = IndexPipeline::new(&settings)
        .run(&jsonl_source(&[long_record("long.md", "w", 800)]))
        .unwrap();
    assert_eq!(long.postings.avg_doc_len, 800.0);
    assert_eq!((long.postings.bm25.k1, long.postings.bm25.b), (1.2, 0.6));

    let short = IndexPipeline::new(&settings)
        .run(&jsonl_source(&[long_record("short.md", "w", 799)]))
        .unwrap();
    assert_eq!((short.postings.bm25.k1, short.postings.bm25.b), (1.7, 0.8));
}

#[test]
fn test_empty_corpus_builds_empty_output() {
    for sharded in [true, false] {
        let mut settings = test_settings();
        settings.shards.enabled = sharded;
        let source = JsonlChunkSource::from_reader(Cursor::new("")).unwrap();

        let output = IndexPipeline::new(&settings).run(&source).unwrap();

        assert_eq!(output.postings.total_docs, 0);
        assert_eq!(output.postings.avg_doc_len, 0.0);
        assert_eq!((output.postings.bm25.k1, output.postings.bm25.b), (1.2, 0.75));
        assert!(output.postings.token.is_empty());
        assert!(output.postings.phrase.is_empty());
        assert_eq!(output.postings.dense.dims, 0);
        assert!(output.postings.dense.merged.is_empty());
        assert_eq!(output.stats.files_scanned, 0);
    }
}

#[test]
fn test_sharded_build_is_independent_of_thread_count() {
    let build = |threads: usize| {
        let mut settings = test_settings();
        settings.shards.min_files = 1;
        settings.workers.threads = threads;
        IndexPipeline::new(&settings)
            .run(&jsonl_source(&corpus::mixed_repo()))
            .unwrap()
    };

    let single = build(1);
    let parallel = build(4);

    assert!(single.plan.len() > 1);
    assert_eq!(single.postings.token.vocab, parallel.postings.token.vocab);
    assert_eq!(single.postings.token.postings, parallel.postings.token.postings);
    assert_eq!(single.postings.phrase.vocab, parallel.postings.phrase.vocab);
    assert_eq!(single.postings.doc_lengths, parallel.postings.doc_lengths);
    let files = |output: &shardex::BuildOutput| -> Vec<String> {
        output.postings.chunks.iter().map(|c| c.file.clone()).collect()
    };
    assert_eq!(files(&single), files(&parallel));
    assert_eq!(single.scanned_files, parallel.scanned_files);
}

#[test]
fn test_sharded_and_ordered_builds_index_the_same_chunks() {
    let mut settings = test_settings();
    settings.shards.min_files = 1;
    let sharded = IndexPipeline::new(&settings)
        .run(&jsonl_source(&corpus::mixed_repo()))
        .unwrap();

    settings.shards.enabled = false;
    let ordered = IndexPipeline::new(&settings)
        .run(&jsonl_source(&corpus::mixed_repo()))
        .unwrap();

    assert_eq!(sharded.postings.total_docs, ordered.postings.total_docs);
    assert_eq!(sharded.stats.tokens, ordered.stats.tokens);

    let mut sharded_vocab = sharded.postings.token.vocab.clone();
    let mut ordered_vocab = ordered.postings.token.vocab.clone();
    sharded_vocab.sort();
    ordered_vocab.sort();
    assert_eq!(sharded_vocab, ordered_vocab);

    // Unsharded builds keep file order
    let first_files: Vec<&str> = ordered
        .postings
        .chunks
        .iter()
        .map(|c| c.file.as_str())
        .collect();
    assert_eq!(
        first_files,
        vec![
            "src/parser.rs",
            "src/parser.rs",
            "src/lexer.rs",
            "src/ast.rs",
            "lib/util.py",
            "lib/io.py",
            "lib/cli.py",
        ]
    );
}

#[test]
fn test_shared_budget_trims_every_shard() {
    let mut settings = test_settings();
    settings.shards.min_files = 1;
    settings.retention.mode = RetentionMode::Auto;
    settings.retention.max_tokens = 10;
    settings.retention.sample_size = 1;

    let output = IndexPipeline::new(&settings)
        .run(&jsonl_source(&corpus::mixed_repo()))
        .unwrap();

    assert!(output.stats.retention_downgraded);
    assert!(output.postings.chunks.iter().all(|c| c.tokens.len() <= 1));
    assert_eq!(output.stats.tokens, 21);
    // Postings are unaffected by retention
    assert!(output.postings.token.get("recover").is_some());
}

#[test]
fn test_fixed_retention_is_applied_per_chunk() {
    let mut settings = test_settings();
    settings.shards.enabled = false;
    settings.retention.mode = RetentionMode::None;

    let output = IndexPipeline::new(&settings)
        .run(&jsonl_source(&corpus::mixed_repo()))
        .unwrap();

    assert!(!output.stats.retention_downgraded);
    assert!(output.postings.chunks.iter().all(|c| c.tokens.is_empty()));
    assert!(output.postings.chunks.iter().all(|c| c.token_count == 3));
}

#[test]
fn test_whole_file_source_build_records_skips() {
    let project = TestProject::new();
    project.add_file("src/config_loader.rs", "fn loadConfig(path: &Path) {}\n");
    project.add_file("src/blank.rs", "   \n");

    let mut settings = test_settings();
    settings.shards.enabled = false;
    let source = WholeFileSource::new(
        project.path(),
        vec![
            "src/config_loader.rs".to_string(),
            "src/blank.rs".to_string(),
            "src/missing.rs".to_string(),
        ],
    );

    let output = IndexPipeline::new(&settings).run(&source).unwrap();

    assert_eq!(output.scanned_files, vec!["src/config_loader.rs".to_string()]);
    assert_eq!(output.stats.files_skipped, 2);
    let reasons: Vec<(&str, &SkipReason)> = output
        .skipped_files
        .iter()
        .map(|s| (s.path.as_str(), &s.reason))
        .collect();
    assert_eq!(reasons[0], ("src/blank.rs", &SkipReason::Empty));
    assert_eq!(reasons[1].0, "src/missing.rs");
    assert!(matches!(reasons[1].1, SkipReason::Unreadable(_)));

    assert!(output.postings.token.get("config").is_some());
    let name = output.postings.field(Field::Name);
    assert!(name.postings.get("loader").is_some());
    assert!(output.file_info.contains_key("src/blank.rs"));
    assert!(output.file_info["src/config_loader.rs"].hash.is_some());
}

#[test]
fn test_windows_style_paths_are_built_not_skipped() {
    let records = vec![
        record("lib\\win\\x.rs", &["open", "file"]),
        record("lib/win/y.rs", &["close", "file"]),
    ];

    for sharded in [true, false] {
        let mut settings = test_settings();
        settings.shards.enabled = sharded;
        settings.shards.min_files = 1;

        let output = IndexPipeline::new(&settings).run(&jsonl_source(&records)).unwrap();
        assert!(output.skipped_files.is_empty(), "sharded={sharded}");
        assert_eq!(output.postings.total_docs, 2);
        assert!(output.scanned_files.contains(&"lib/win/x.rs".to_string()));
    }
}
