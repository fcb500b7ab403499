//! Dense vector resolution and the offload fallback path.

use crate::common::{jsonl_source, record, test_settings};
use shardex::vector::VectorKind;
use shardex::{
    ChunkRecord, IndexPipeline, OffloadError, QuantizationParams, RayonOffload, WorkOffload,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Offload that always answers with the same error
struct RefusingOffload {
    error: fn() -> OffloadError,
    calls: AtomicUsize,
}

impl RefusingOffload {
    fn new(error: fn() -> OffloadError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }
}

impl WorkOffload for RefusingOffload {
    fn submit_quantize_batch(
        &self,
        _vectors: &[Vec<f32>],
        _params: QuantizationParams,
    ) -> Result<Vec<Vec<u8>>, OffloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    fn submit_tokenize(
        &self,
        _text: &str,
        _language_hint: Option<&str>,
    ) -> Result<Vec<String>, OffloadError> {
        Err((self.error)())
    }
}

fn embedded(
    file: &str,
    merged: Vec<f32>,
    doc: Option<Vec<f32>>,
    code: Option<Vec<f32>>,
) -> ChunkRecord {
    let mut chunk = record(file, &["body"]);
    chunk.embedding = Some(merged);
    chunk.embed_doc = doc;
    chunk.embed_code = code;
    chunk
}

fn corpus() -> Vec<ChunkRecord> {
    vec![
        embedded("a.rs", vec![1.0, -1.0], Some(vec![-1.0, -1.0]), Some(vec![1.0, 1.0])),
        // Explicit "no doc" marker and no code vector
        embedded("b.rs", vec![1.0, 1.0], Some(Vec::new()), None),
        // Missing doc marker falls back to merged
        embedded("c.rs", vec![-1.0, 1.0], None, None),
    ]
}

#[test]
fn test_vector_fallback_chain_end_to_end() {
    let mut settings = test_settings();
    settings.shards.enabled = false;

    let output = IndexPipeline::new(&settings).run(&jsonl_source(&corpus())).unwrap();
    let dense = &output.postings.dense;

    assert_eq!(dense.dims, 2);
    assert_eq!(dense.get(VectorKind::Merged), &[vec![255u8, 0], vec![255, 255], vec![0, 255]]);
    assert_eq!(dense.get(VectorKind::Doc), &[vec![0u8, 0], vec![128, 128], vec![0, 255]]);
    assert_eq!(dense.get(VectorKind::Code), &[vec![255u8, 255], vec![255, 255], vec![0, 255]]);
    assert_eq!(dense.stats.missing_doc_markers, 1);
    assert_eq!(dense.stats.zero_vectors, 1);
}

#[test]
fn test_unavailable_offload_retries_then_falls_back() {
    let mut settings = test_settings();
    settings.shards.enabled = false;
    settings.embeddings.offload_retries = 2;
    let offload = RefusingOffload::new(|| OffloadError::Unavailable {
        reason: "queue full".to_string(),
    });

    let with_offload = IndexPipeline::new(&settings)
        .with_offload(Some(&offload))
        .run(&jsonl_source(&corpus()))
        .unwrap();
    let local = IndexPipeline::new(&settings).run(&jsonl_source(&corpus())).unwrap();

    let stats = &with_offload.postings.dense.stats;
    // One batch per vector kind, each tried three times
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.retries, 6);
    assert_eq!(stats.fallback_batches, 3);
    assert_eq!(offload.calls.load(Ordering::SeqCst), 9);
    assert_eq!(with_offload.postings.dense.merged, local.postings.dense.merged);
    assert_eq!(with_offload.postings.dense.code, local.postings.dense.code);
}

#[test]
fn test_failed_offload_falls_back_without_retry() {
    let mut settings = test_settings();
    settings.shards.enabled = false;
    let offload = RefusingOffload::new(|| OffloadError::Failed {
        reason: "worker crashed".to_string(),
    });

    let output = IndexPipeline::new(&settings)
        .with_offload(Some(&offload))
        .run(&jsonl_source(&corpus()))
        .unwrap();

    let stats = &output.postings.dense.stats;
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.fallback_batches, 3);
    assert_eq!(offload.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_rayon_offload_matches_local_quantization() {
    let mut settings = test_settings();
    settings.shards.enabled = false;
    settings.embeddings.batch_size = 2;
    let pool = RayonOffload::new(2).unwrap();

    let pooled = IndexPipeline::new(&settings)
        .with_offload(Some(&pool))
        .run(&jsonl_source(&corpus()))
        .unwrap();
    let local = IndexPipeline::new(&settings).run(&jsonl_source(&corpus())).unwrap();

    let (pooled, local) = (&pooled.postings.dense, &local.postings.dense);
    assert_eq!(pooled.merged, local.merged);
    assert_eq!(pooled.doc, local.doc);
    assert_eq!(pooled.code, local.code);
    // Three chunks in batches of two, for each of the three kinds
    assert_eq!(pooled.stats.offloaded_batches, 6);
    assert_eq!(pooled.stats.fallback_batches, 0);
    assert_eq!(local.stats.offloaded_batches, 0);
}

#[test]
fn test_quantized_records_pass_through_the_pipeline() {
    let mut settings = test_settings();
    settings.shards.enabled = false;

    let mut byte_chunk = record("d.rs", &["body"]);
    byte_chunk.embedding_u8 = Some(vec![3, 250]);
    byte_chunk.embed_doc_u8 = Some(Vec::new());
    let mut records = corpus();
    records.push(byte_chunk);

    let offload = RefusingOffload::new(|| OffloadError::Failed {
        reason: "worker crashed".to_string(),
    });
    let output = IndexPipeline::new(&settings)
        .with_offload(Some(&offload))
        .run(&jsonl_source(&records))
        .unwrap();
    let dense = &output.postings.dense;

    assert_eq!(dense.dims, 2);
    assert_eq!(dense.get(VectorKind::Merged)[3], vec![3u8, 250]);
    assert_eq!(dense.get(VectorKind::Doc)[3], vec![128u8, 128]);
    assert_eq!(dense.get(VectorKind::Code)[3], vec![3u8, 250]);
    // Float chunks are unaffected by their quantized neighbour
    assert_eq!(dense.get(VectorKind::Merged)[0], vec![255u8, 0]);
    assert_eq!(dense.stats.prequantized, 3);
    assert_eq!(dense.stats.fallback_batches, 3);
}
