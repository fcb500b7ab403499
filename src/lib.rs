//! Sharded postings and dense-vector index construction.
//!
//! Chunks flow through an accumulator (`IndexState`), get merged across
//! shards in a fixed order, and are finalized by the `PostingsBuilder` into
//! flat, export-ready postings and quantized vectors.

pub mod config;
pub mod error;
pub mod indexing;
pub mod offload;
pub mod postings;
pub mod sharding;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{IndexError, IndexResult, OffloadError, ShardError, ShardResult, SourceError};
pub use indexing::{
    BuildOutput, BuildStats, Chunk, ChunkRecord, ChunkSource, IndexPipeline, IndexState,
    JsonlChunkSource, RetentionPolicy, TokenRetention, WholeFileSource, calculate_hash,
    merge_ordered,
};
pub use offload::{RayonOffload, WorkOffload};
pub use postings::{Bm25Params, PostingCell, PostingsBuilder, PostingsMap, PostingsOutput};
pub use sharding::{FileEntry, PerfProfile, PlanOptions, Shard, plan_shards};
pub use types::{DocId, Field, FieldSet, TermPosting};
pub use vector::{DenseVectors, QuantizationParams};
