//! Shard planning: grouping files into balanced units of parallel work.

mod batches;
mod entry;
mod planner;
mod profile;

pub use batches::{
    SPLIT_SHARE, SPLIT_SHARE_LARGE, WorkItem, batch_weight, build_work_plan, execution_order,
    plan_batches,
};
pub use entry::{FileEntry, normalize_rel};
pub use planner::{ESTIMATED_BYTES_PER_LINE, PlanOptions, PlannedFile, Shard, plan_shards, shard_id};
pub use profile::{AnalysisFeatures, CostModel, DEFAULT_LANGUAGE, PerfProfile, SizeBucket};
