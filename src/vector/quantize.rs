//! Scalar quantization of float embeddings into byte codes.
//!
//! Each component is clamped into `[min, max]` and mapped linearly onto
//! `levels` evenly spaced codes. With the default range `[-1, 1]` and 256
//! levels, `0.0` maps to code 128.

use serde::{Deserialize, Serialize};

/// Validated quantization range and resolution.
///
/// Obtain one through `EmbeddingConfig::quantization`, which rejects empty or
/// non-finite ranges and level counts outside `2..=256`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub min: f32,
    pub max: f32,
    pub levels: u32,
}

impl Default for QuantizationParams {
    fn default() -> Self {
        Self {
            min: -1.0,
            max: 1.0,
            levels: 256,
        }
    }
}

impl QuantizationParams {
    /// Quantizes one component.
    ///
    /// Non-finite input is treated as `0.0`.
    #[must_use]
    pub fn quantize_value(&self, value: f32) -> u8 {
        let value = if value.is_finite() { value } else { 0.0 };
        let clamped = value.clamp(self.min, self.max);
        let span = self.max - self.min;
        let top = (self.levels.saturating_sub(1)) as f32;
        let code = ((clamped - self.min) / span * top).round();
        code.clamp(0.0, 255.0) as u8
    }

    /// Quantizes a whole vector.
    #[must_use]
    pub fn quantize(&self, vector: &[f32]) -> Vec<u8> {
        vector.iter().map(|&v| self.quantize_value(v)).collect()
    }

    /// The code that `0.0` maps to; used to fill zero vectors.
    #[must_use]
    pub fn zero_code(&self) -> u8 {
        self.quantize_value(0.0)
    }
}

/// Quantizes a batch locally.
#[must_use]
pub fn quantize_batch(vectors: &[Vec<f32>], params: &QuantizationParams) -> Vec<Vec<u8>> {
    vectors.iter().map(|v| params.quantize(v)).collect()
}

/// Truncates already quantized `codes` to `dims`, padding with `fill`.
#[must_use]
pub fn fit_codes(codes: &[u8], dims: usize, fill: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(dims);
    out.extend(codes.iter().copied().take(dims));
    out.resize(dims, fill);
    out
}

/// Truncates or zero-pads `vector` to exactly `dims` components.
#[must_use]
pub fn fit_dims(vector: &[f32], dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    out.extend(vector.iter().copied().take(dims));
    out.resize(dims, 0.0);
    out
}
