//! Settings layering (defaults, TOML file, `SX_` environment) as seen by a build.

use crate::common::{TestProject, corpus, jsonl_source};
use shardex::config::{RetentionMode, TokenSource};
use shardex::indexing::TokenBudget;
use shardex::{IndexPipeline, RetentionPolicy, Settings, TokenRetention};

#[test]
fn test_file_settings_drive_the_build() {
    let project = TestProject::new();
    let config_path = project.add_file(
        ".shardex/settings.toml",
        r#"
[postings]
enable_chargrams = false
phrase_max_n = 2

[shards]
enabled = false

[workers]
threads = 1
offload = false
"#,
    );

    let settings = Settings::load_from(&config_path).expect("Should load settings");
    assert!(!settings.shards.enabled);
    assert_eq!(settings.postings.phrase_min_n, 2);
    assert_eq!(settings.postings.chargram_source, TokenSource::Fields);

    let output = IndexPipeline::new(&settings)
        .run(&jsonl_source(&corpus::mixed_repo()))
        .unwrap();
    assert!(output.plan.is_empty());
    assert!(output.postings.chargram.is_empty());
    assert_eq!(output.tokenization.chargrams, 0);
    // Only bigrams: two per three-token chunk
    assert_eq!(output.tokenization.phrase_ngrams, 14);
}

#[test]
fn test_env_override_wins_over_file() {
    let project = TestProject::new();
    let config_path = project.add_file("settings.toml", "[shards]\nmin_files = 2\n");

    unsafe {
        std::env::set_var("SX_SHARDS__MIN_FILES", "9");
    }
    let settings = Settings::load_from(&config_path);
    unsafe {
        std::env::remove_var("SX_SHARDS__MIN_FILES");
    }

    assert_eq!(settings.unwrap().shards.min_files, 9);
}

#[test]
fn test_saved_settings_reload_unchanged() {
    let project = TestProject::new();
    let path = project.path().join(".shardex").join("settings.toml");

    let mut settings = Settings::default();
    settings.retention.mode = RetentionMode::Sample;
    settings.retention.sample_size = 7;
    settings.shards.features = vec!["relations".to_string(), "embeddings".to_string()];
    settings.save(&path).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.retention, settings.retention);
    assert_eq!(loaded.shards.features, settings.shards.features);
    assert_eq!(loaded.embeddings, settings.embeddings);
}

#[test]
fn test_auto_retention_resolves_by_file_count() {
    let mut settings = Settings::default();
    settings.retention.max_files = 3;

    let small = RetentionPolicy::resolve(&settings.retention, 3, TokenBudget::new(100));
    assert!(small.is_auto());
    assert_eq!(small.current(), TokenRetention::Full);

    let large = RetentionPolicy::resolve(&settings.retention, 4, TokenBudget::new(100));
    assert!(!large.is_auto());
    assert_eq!(
        large.current(),
        TokenRetention::Sample(settings.retention.sample_size)
    );
}
