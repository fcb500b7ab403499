//! Offloading of heavy numeric and text work to a worker pool.
//!
//! The builder and the whole-file chunk source never depend on a concrete
//! pool: they talk to `WorkOffload` and recompute locally whenever a request
//! fails.

mod pool;
pub mod tokenize;

pub use pool::RayonOffload;
pub use tokenize::split_identifiers;

use crate::error::OffloadError;
use crate::vector::QuantizationParams;

/// A pool that can run quantization and tokenization requests.
pub trait WorkOffload: Send + Sync {
    /// Quantize a batch of equal-length vectors.
    ///
    /// On success the result has one code vector per input vector.
    fn submit_quantize_batch(
        &self,
        vectors: &[Vec<f32>],
        params: QuantizationParams,
    ) -> Result<Vec<Vec<u8>>, OffloadError>;

    /// Tokenize free text, optionally hinted with a language id.
    fn submit_tokenize(
        &self,
        text: &str,
        language_hint: Option<&str>,
    ) -> Result<Vec<String>, OffloadError>;
}
