use super::quantize::{QuantizationParams, fit_codes, fit_dims, quantize_batch};
use crate::config::EmbeddingConfig;
use crate::error::{IndexError, IndexResult};
use crate::indexing::Chunk;
use crate::offload::WorkOffload;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The three vector channels emitted per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    Merged,
    Doc,
    Code,
}

impl VectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorKind::Merged => "merged",
            VectorKind::Doc => "doc",
            VectorKind::Code => "code",
        }
    }
}

/// Counters describing how the dense arrays were produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DenseStats {
    pub batches: usize,
    pub offloaded_batches: usize,
    pub fallback_batches: usize,
    pub retries: usize,
    /// Vectors taken from already quantized chunk input
    pub prequantized: usize,
    pub missing_doc_markers: usize,
    pub zero_vectors: usize,
}

/// Quantized vectors, one per chunk and kind, all `dims` long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseVectors {
    pub dims: usize,
    pub merged: Vec<Vec<u8>>,
    pub doc: Vec<Vec<u8>>,
    pub code: Vec<Vec<u8>>,
    pub stats: DenseStats,
}

impl DenseVectors {
    pub fn get(&self, kind: VectorKind) -> &[Vec<u8>] {
        match kind {
            VectorKind::Merged => &self.merged,
            VectorKind::Doc => &self.doc,
            VectorKind::Code => &self.code,
        }
    }
}

/// Dimensionality of the first chunk carrying any non-empty vector.
///
/// Quantized vectors are consulted across all chunks before float ones.
/// Within a chunk merged vectors are checked first, then code, then doc.
/// Zero when no chunk has one.
pub fn infer_dims(chunks: &[Chunk]) -> usize {
    let quantized = chunks.iter().find_map(|chunk| {
        [&chunk.embedding_u8, &chunk.embed_code_u8, &chunk.embed_doc_u8]
            .into_iter()
            .flatten()
            .map(Vec::len)
            .find(|&len| len > 0)
    });
    quantized
        .or_else(|| {
            chunks.iter().find_map(|chunk| {
                [&chunk.embedding, &chunk.embed_code, &chunk.embed_doc]
                    .into_iter()
                    .flatten()
                    .map(Vec::len)
                    .find(|&len| len > 0)
            })
        })
        .unwrap_or(0)
}

fn non_empty<T>(vector: &Option<Vec<T>>) -> Option<&[T]> {
    vector.as_deref().filter(|v| !v.is_empty())
}

fn carries_codes(chunk: &Chunk) -> bool {
    chunk.embedding_u8.is_some() || chunk.embed_doc_u8.is_some() || chunk.embed_code_u8.is_some()
}

fn note_missing_doc_marker(stats: &mut DenseStats) {
    if stats.missing_doc_markers == 0 {
        warn!("Missing doc embedding marker for some chunks; falling back to merged embeddings");
    }
    stats.missing_doc_markers += 1;
}

/// Pick the entry for `kind`: its own vector, then merged, then nothing.
///
/// A doc entry that is present but empty is the explicit "no doc" marker.
fn pick<'a, T>(
    merged: Option<&'a [T]>,
    doc: &'a Option<Vec<T>>,
    code: &'a Option<Vec<T>>,
    kind: VectorKind,
    stats: &mut DenseStats,
) -> Option<&'a [T]> {
    match kind {
        VectorKind::Merged => merged,
        VectorKind::Code => non_empty(code).or(merged),
        VectorKind::Doc => match doc {
            Some(doc) if doc.is_empty() => None,
            Some(doc) => Some(doc.as_slice()),
            None => {
                note_missing_doc_marker(stats);
                merged
            }
        },
    }
}

/// Resolve one chunk's already quantized vector for `kind`.
///
/// `None` when the chunk carries no quantized vectors; a chunk that carries
/// any resolves every kind from them and never consults its float vectors.
fn select_codes(
    chunk: &Chunk,
    kind: VectorKind,
    dims: usize,
    zero: u8,
    stats: &mut DenseStats,
) -> Option<Vec<u8>> {
    if !carries_codes(chunk) {
        return None;
    }
    let merged = non_empty(&chunk.embedding_u8);
    let picked = pick(merged, &chunk.embed_doc_u8, &chunk.embed_code_u8, kind, stats);
    stats.prequantized += 1;
    Some(match picked {
        Some(codes) => fit_codes(codes, dims, zero),
        None => {
            stats.zero_vectors += 1;
            vec![zero; dims]
        }
    })
}

/// Resolve one chunk's float vector for `kind`.
///
/// The kind's own vector wins, then the merged vector, then zeros. A doc
/// vector that is present but empty is an explicit "no doc" marker and
/// resolves to zeros without consulting the merged vector.
fn select_vector(chunk: &Chunk, kind: VectorKind, dims: usize, stats: &mut DenseStats) -> Vec<f32> {
    let merged = non_empty(&chunk.embedding);
    match pick(merged, &chunk.embed_doc, &chunk.embed_code, kind, stats) {
        Some(vector) => fit_dims(vector, dims),
        None => {
            stats.zero_vectors += 1;
            vec![0.0; dims]
        }
    }
}

struct BatchQuantizer<'a> {
    offload: Option<&'a dyn WorkOffload>,
    params: QuantizationParams,
    batch_size: usize,
    retries: u32,
    dims: usize,
    fallback_warned: bool,
}

impl BatchQuantizer<'_> {
    fn quantize_kind(
        &mut self,
        chunks: &[Chunk],
        kind: VectorKind,
        stats: &mut DenseStats,
    ) -> Vec<Vec<u8>> {
        let zero = self.params.zero_code();
        let mut out = Vec::with_capacity(chunks.len());
        for window in chunks.chunks(self.batch_size) {
            let mut slots = Vec::with_capacity(window.len());
            let mut batch = Vec::new();
            for chunk in window {
                let codes = select_codes(chunk, kind, self.dims, zero, stats);
                if codes.is_none() {
                    batch.push(select_vector(chunk, kind, self.dims, stats));
                }
                slots.push(codes);
            }

            let mut quantized = if batch.is_empty() {
                Vec::new().into_iter()
            } else {
                stats.batches += 1;
                self.run_batch(&batch, stats).into_iter()
            };
            let dims = self.dims;
            out.extend(slots.into_iter().map(|slot| {
                slot.or_else(|| quantized.next())
                    .unwrap_or_else(|| vec![zero; dims])
            }));
        }
        debug!("Quantized {} {} vectors", out.len(), kind.as_str());
        out
    }

    fn run_batch(&mut self, batch: &[Vec<f32>], stats: &mut DenseStats) -> Vec<Vec<u8>> {
        let Some(offload) = self.offload else {
            return quantize_batch(batch, &self.params);
        };

        let mut attempt = 0;
        let reason = loop {
            match offload.submit_quantize_batch(batch, self.params) {
                Ok(codes)
                    if codes.len() == batch.len() && codes.iter().all(|c| c.len() == self.dims) =>
                {
                    stats.offloaded_batches += 1;
                    return codes;
                }
                Ok(codes) => {
                    break format!(
                        "worker returned {} vectors for a batch of {}",
                        codes.len(),
                        batch.len()
                    );
                }
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    stats.retries += 1;
                }
                Err(e) => break e.to_string(),
            }
        };

        if !self.fallback_warned {
            warn!("Quantize worker unavailable; falling back to local quantization: {reason}");
            self.fallback_warned = true;
        }
        stats.fallback_batches += 1;
        quantize_batch(batch, &self.params)
    }
}

/// Build the merged, doc and code vector arrays for `chunks`.
///
/// Returns empty arrays with `dims == 0` when embeddings are disabled or no
/// chunk carries a vector.
pub fn build_dense_vectors(
    chunks: &[Chunk],
    config: &EmbeddingConfig,
    params: QuantizationParams,
    offload: Option<&dyn WorkOffload>,
    cancel: Option<&CancellationToken>,
) -> IndexResult<DenseVectors> {
    if !config.enabled {
        return Ok(DenseVectors::default());
    }
    let dims = config.dims.unwrap_or_else(|| infer_dims(chunks));
    if dims == 0 {
        return Ok(DenseVectors::default());
    }

    let mut quantizer = BatchQuantizer {
        offload,
        params,
        batch_size: config.batch_size.max(1),
        retries: config.offload_retries,
        dims,
        fallback_warned: false,
    };
    let mut stats = DenseStats::default();
    let mut arrays = Vec::with_capacity(3);

    for kind in [VectorKind::Merged, VectorKind::Doc, VectorKind::Code] {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(IndexError::Cancelled {
                phase: "dense vectors",
            });
        }
        arrays.push(quantizer.quantize_kind(chunks, kind, &mut stats));
    }

    let code = arrays.pop().unwrap_or_default();
    let doc = arrays.pop().unwrap_or_default();
    let merged = arrays.pop().unwrap_or_default();

    Ok(DenseVectors {
        dims,
        merged,
        doc,
        code,
        stats,
    })
}
