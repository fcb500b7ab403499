//! Dense embedding vectors.
//!
//! Float embeddings carried on chunks are resolved per kind (merged, doc,
//! code), fitted to one dimensionality and quantized to byte codes, in
//! batches through an optional `WorkOffload` with local fallback. Chunks that
//! arrive with byte vectors already quantized skip that step.

mod dense;
mod quantize;

pub use dense::{DenseStats, DenseVectors, VectorKind, build_dense_vectors};
pub use quantize::{QuantizationParams, fit_codes, fit_dims, quantize_batch};
