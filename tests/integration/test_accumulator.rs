//! Accumulator behavior through the public API: posting cells, chunk ids,
//! merging and auto retention.

use crate::common::{long_record, record};
use shardex::config::PostingsConfig;
use shardex::indexing::{FileInfo, TokenBudget};
use shardex::postings::PHRASE_SEPARATOR;
use shardex::{DocId, IndexState, PostingCell, RetentionPolicy, TermPosting, TokenRetention};

fn full() -> RetentionPolicy {
    RetentionPolicy::fixed(TokenRetention::Full)
}

fn phrase(parts: &[&str]) -> String {
    parts.join(&PHRASE_SEPARATOR.to_string())
}

#[test]
fn test_posting_cells_promote_and_count_tf() {
    let config = PostingsConfig::default();
    let mut policy = full();
    let mut state = IndexState::new();

    state
        .append(record("a.rs", &["open", "open", "file"]), &mut policy, &config)
        .unwrap();
    assert_eq!(
        state.token_postings().get("open"),
        Some(&PostingCell::Single(TermPosting::new(DocId(0), 2)))
    );

    state
        .append(record("a.rs", &["open", "socket"]), &mut policy, &config)
        .unwrap();
    assert_eq!(
        state.token_postings().get("open"),
        Some(&PostingCell::Many(vec![
            TermPosting::new(DocId(0), 2),
            TermPosting::new(DocId(1), 1),
        ]))
    );
    // Single-occurrence phrases never allocate
    assert_eq!(
        state.phrase_postings().get(&phrase(&["open", "socket"])),
        Some(&PostingCell::Single(DocId(1)))
    );
    assert_eq!(state.doc_lengths(), &[3, 2]);
}

#[test]
fn test_chunk_ids_are_stable_across_merges() {
    let config = PostingsConfig::default();
    let mut first = IndexState::new();
    let mut second = IndexState::new();
    let mut policy = full();

    for words in [&["a"][..], &["b"], &["c"]] {
        first.append(record("one.rs", words), &mut policy, &config).unwrap();
    }
    for words in [&["d"][..], &["e"]] {
        second.append(record("two.rs", words), &mut policy, &config).unwrap();
    }

    first.merge_from(second).unwrap();

    let ids: Vec<u32> = first.chunks().iter().map(|c| c.id.value()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    let files: Vec<&str> = first.chunks().iter().map(|c| c.file.as_str()).collect();
    assert_eq!(files, vec!["one.rs", "one.rs", "one.rs", "two.rs", "two.rs"]);
    assert_eq!(
        first.token_postings().get("e").map(|cell| cell.as_slice().to_vec()),
        Some(vec![TermPosting::new(DocId(4), 1)])
    );
    for (index, chunk) in first.chunks().iter().enumerate() {
        assert_eq!(first.chunk(DocId(index as u32)), Some(chunk));
    }
}

#[test]
fn test_merge_keeps_first_file_info_and_sums_counters() {
    let config = PostingsConfig::default();
    let mut policy = full();

    let mut target = IndexState::new();
    target.record_file_info(FileInfo::new("shared.rs", 100, 10));
    target.append(record("shared.rs", &["x", "y"]), &mut policy, &config).unwrap();
    target.record_scanned("shared.rs");

    let mut source = IndexState::new();
    source.record_file_info(FileInfo::new("shared.rs", 999, 99));
    source.record_file_info(FileInfo::new("other.rs", 5, 1));
    source.append(record("other.rs", &["y", "z", "w"]), &mut policy, &config).unwrap();
    source.record_scanned("other.rs");

    target.merge_from(source).unwrap();

    assert_eq!(target.file_info()["shared.rs"].bytes, 100);
    assert_eq!(target.file_info()["other.rs"].bytes, 5);
    assert_eq!(target.total_tokens(), 5);
    assert_eq!(target.tokenization().chunks, 2);
    assert_eq!(target.scanned_files(), &["shared.rs", "other.rs"]);
    assert_eq!(
        target.token_postings().get("y").map(|cell| cell.len()),
        Some(2)
    );
}

#[test]
fn test_auto_retention_trims_earlier_chunks() {
    let config = PostingsConfig::default();
    let budget = TokenBudget::new(12);
    let mut policy = RetentionPolicy::auto(2, budget.clone());
    let mut state = IndexState::new();

    state.append(long_record("a.rs", "a", 8), &mut policy, &config).unwrap();
    assert_eq!(state.chunks()[0].tokens.len(), 8);

    state.append(long_record("b.rs", "b", 8), &mut policy, &config).unwrap();

    assert!(budget.is_exceeded());
    assert_eq!(policy.current(), TokenRetention::Sample(2));
    for chunk in state.chunks() {
        assert_eq!(chunk.tokens.len(), 2);
        assert_eq!(chunk.token_count, 8);
    }
    // Postings were recorded before trimming
    assert!(state.token_postings().contains("a7"));
    assert!(state.token_postings().contains("b7"));
}

#[test]
fn test_trim_target_follows_working_state_downgrade() {
    let config = PostingsConfig::default();
    let budget = TokenBudget::new(5);
    let mut policy = RetentionPolicy::auto(1, budget);

    let mut main = IndexState::new();
    main.append(long_record("a.rs", "a", 4), &mut policy, &config).unwrap();

    let mut working = IndexState::new();
    working
        .append_with_trim_target(long_record("b.rs", "b", 4), &mut policy, &config, &mut main)
        .unwrap();

    assert_eq!(main.chunks()[0].tokens, vec!["a0".to_string()]);
    assert_eq!(working.chunks()[0].tokens, vec!["b0".to_string()]);

    main.merge_from(working).unwrap();
    assert_eq!(main.len(), 2);
}
