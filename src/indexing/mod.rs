pub mod chunk;
pub mod file_info;
mod merge;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod retention;
pub mod source;
mod state;

pub use chunk::{Chunk, ChunkRecord, FieldTokens};
pub use file_info::{
    FileDetails, FileInfo, SkipReason, SkippedFile, calculate_hash, count_lines,
};
pub use merge::merge_ordered;
pub use pipeline::{Accumulated, BuildOutput, IndexPipeline};
pub use progress::{BuildStats, ManifestStats, TokenizationStats};
pub use queue::{PendingQueue, Reservation};
pub use retention::{RetentionEvent, RetentionPolicy, TokenBudget, TokenRetention};
pub use source::{ChunkSource, FileChunks, JsonlChunkSource, WholeFileSource};
pub use state::IndexState;
