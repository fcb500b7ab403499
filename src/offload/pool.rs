//! In-process worker pool backed by a dedicated rayon thread pool.

use super::WorkOffload;
use super::tokenize::split_identifiers;
use crate::error::OffloadError;
use crate::vector::{QuantizationParams, quantize_batch};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Runs offloaded requests on its own rayon pool.
///
/// Admission is bounded: once `max_in_flight` requests are running, further
/// submissions report `Unavailable` instead of queueing. A closed pool also
/// reports `Unavailable`.
pub struct RayonOffload {
    pool: rayon::ThreadPool,
    in_flight: AtomicUsize,
    max_in_flight: usize,
    closed: AtomicBool,
}

struct Admission<'a>(&'a AtomicUsize);

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RayonOffload {
    pub fn new(threads: usize) -> Result<Self, OffloadError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shardex-offload-{i}"))
            .build()
            .map_err(|e| OffloadError::Unavailable {
                reason: format!("failed to start worker pool: {e}"),
            })?;
        Ok(Self {
            pool,
            in_flight: AtomicUsize::new(0),
            max_in_flight: threads * 4,
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Stop accepting work; later submissions report `Unavailable`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn admit(&self) -> Result<Admission<'_>, OffloadError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OffloadError::Unavailable {
                reason: "worker pool is closed".to_string(),
            });
        }
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= self.max_in_flight {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(OffloadError::Unavailable {
                reason: format!("{} requests already in flight", self.max_in_flight),
            });
        }
        Ok(Admission(&self.in_flight))
    }
}

impl WorkOffload for RayonOffload {
    fn submit_quantize_batch(
        &self,
        vectors: &[Vec<f32>],
        params: QuantizationParams,
    ) -> Result<Vec<Vec<u8>>, OffloadError> {
        let _admission = self.admit()?;
        if let Some(first) = vectors.first() {
            let dims = first.len();
            if let Some(pos) = vectors.iter().position(|v| v.len() != dims) {
                return Err(OffloadError::Failed {
                    reason: format!(
                        "vector {pos} has {} dims, expected {dims}",
                        vectors[pos].len()
                    ),
                });
            }
        }
        if vectors.len() < 32 {
            return Ok(self.pool.install(|| quantize_batch(vectors, &params)));
        }
        Ok(self.pool.install(|| {
            vectors
                .par_iter()
                .map(|vector| params.quantize(vector))
                .collect()
        }))
    }

    fn submit_tokenize(
        &self,
        text: &str,
        _language_hint: Option<&str>,
    ) -> Result<Vec<String>, OffloadError> {
        let _admission = self.admit()?;
        Ok(self.pool.install(|| split_identifiers(text)))
    }
}
