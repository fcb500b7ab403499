//! Shard plans derived from chunk sources, profiles and the work plan.

use crate::common::{TestProject, record, test_settings, to_jsonl};
use shardex::sharding::{build_work_plan, plan_batches, shard_id};
use shardex::{
    ChunkSource, FileEntry, IndexError, IndexPipeline, JsonlChunkSource, PerfProfile, ShardError,
};
use std::collections::BTreeSet;
use std::path::Path;

fn repo_source() -> JsonlChunkSource {
    let mut records = Vec::new();
    for dir in ["api", "core", "docs"] {
        for i in 0..4 {
            let mut chunk = record(&format!("{dir}/file{i}.src"), &["alpha", "beta"]);
            let lang = if dir == "docs" { "markdown" } else { "rust" };
            chunk.metadata.insert("lang".to_string(), lang.into());
            records.push(chunk);
        }
    }
    records.push(record("build.rs", &["main"]));
    let project = TestProject::new();
    let path = project.add_file("chunks.jsonl", &to_jsonl(&records));
    JsonlChunkSource::open(&path).unwrap()
}

#[test]
fn test_plan_groups_by_directory_and_language() {
    let settings = test_settings();
    let source = repo_source();
    let shards = IndexPipeline::new(&settings).plan(&source.entries()).unwrap();

    let labels: Vec<&str> = shards.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["/_misc/.rs", "api/rust", "core/rust", "docs/markdown"]);
    assert_eq!(shards[0].merged_from, vec!["./.rs".to_string()]);
    for shard in &shards {
        assert_eq!(shard.id, shard_id("code", &shard.label));
    }
    let planned: usize = shards.iter().map(|s| s.file_count()).sum();
    assert_eq!(planned, 13);
}

#[test]
fn test_work_plan_covers_every_file_once() {
    let mut settings = test_settings();
    settings.shards.min_files = 1;
    let source = repo_source();
    let shards = IndexPipeline::new(&settings).plan(&source.entries()).unwrap();

    let work = build_work_plan(&shards);
    let batches = plan_batches(&work, 3);
    assert!(batches.len() <= 3);

    let mut seen = BTreeSet::new();
    for item in batches.iter().flatten() {
        for file in item.entries {
            assert!(seen.insert(file.rel.clone()), "{} planned twice", file.rel);
        }
    }
    assert_eq!(seen.len(), 13);

    let keys: BTreeSet<(String, usize)> = work.iter().map(|item| item.merge_key()).collect();
    assert_eq!(keys.len(), work.len());
}

#[test]
fn test_profile_costs_replace_line_counts() {
    let project = TestProject::new();
    let profile_path = project.add_file(
        "profile.json",
        r#"{
  "languages": {
    "rust": { "xs": { "overhead_ms": 5.0, "byte_cost_ms": 0.0, "line_cost_ms": 1.0 } },
    "_default": { "m": { "overhead_ms": 1.0 } }
  }
}"#,
    );
    let profile = PerfProfile::load(&profile_path).unwrap();

    let mut settings = test_settings();
    settings.shards.min_files = 1;
    let entries = vec![
        FileEntry::new("src/a.rs", 400).with_lines(10).with_language("rust"),
        FileEntry::new("doc/b.md", 400).with_lines(10).with_language("markdown"),
    ];

    let plain = IndexPipeline::new(&settings).plan(&entries).unwrap();
    assert!(plain.iter().all(|s| s.cost_ms == 10.0));

    let profiled = IndexPipeline::new(&settings)
        .with_profile(Some(&profile))
        .plan(&entries)
        .unwrap();
    let cost = |label: &str| profiled.iter().find(|s| s.label == label).map(|s| s.cost_ms);
    assert_eq!(cost("src/rust"), Some(15.0));
    assert_eq!(cost("doc/markdown"), Some(1.0));
}

#[test]
fn test_features_scale_costs() {
    let mut settings = test_settings();
    settings.shards.min_files = 1;
    settings.shards.features = vec!["relations".to_string(), "embeddings".to_string()];
    let entries = vec![FileEntry::new("src/a.rs", 0).with_lines(100)];

    let shards = IndexPipeline::new(&settings).plan(&entries).unwrap();
    assert!((shards[0].cost_ms - 135.0).abs() < 1e-9);
}

#[test]
fn test_unresolvable_entry_aborts_planning() {
    let settings = test_settings();
    let entries = vec![
        FileEntry::new("src/a.rs", 10),
        FileEntry::default().with_abs(Path::new("/elsewhere/b.rs")),
    ];

    let err = IndexPipeline::new(&settings).plan(&entries).unwrap_err();
    assert!(matches!(
        err,
        IndexError::Shard(ShardError::MissingPath { index: 1 })
    ));
}
