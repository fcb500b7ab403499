//! Turning a shard plan into parallel work.
//!
//! Large shards are cut into parts so one shard cannot dominate the build,
//! then parts are packed into worker batches longest-first.

use super::planner::{PlannedFile, Shard};

/// Share of any total above which a shard is split in two
pub const SPLIT_SHARE: f64 = 0.05;
/// Share above which a shard is split in four
pub const SPLIT_SHARE_LARGE: f64 = 0.10;

/// One unit of shard work: a shard or a slice of one.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<'a> {
    pub shard: &'a Shard,
    pub entries: &'a [PlannedFile],
    /// 1-based
    pub part_index: usize,
    pub part_total: usize,
    pub predicted_cost_ms: f64,
    /// 1-based position of the shard in execution order
    pub shard_index: usize,
}

impl WorkItem<'_> {
    /// Merge key: results are folded in ascending `(shard id, part)` order
    pub fn merge_key(&self) -> (String, usize) {
        (self.shard.id.clone(), self.part_index)
    }

    /// Packing weight; falls back to shard cost, lines, then file count
    pub fn weight(&self) -> f64 {
        if self.predicted_cost_ms.is_finite() && self.predicted_cost_ms > 0.0 {
            return self.predicted_cost_ms;
        }
        if self.shard.cost_ms > 0.0 {
            return self.shard.cost_ms;
        }
        if self.shard.line_count > 0 {
            return self.shard.line_count as f64;
        }
        self.entries.len() as f64
    }

    pub fn tie_breaker(&self) -> String {
        format!("{}:{}", self.shard.id, self.part_index)
    }
}

/// Shards in execution order: most expensive first.
///
/// Ties fall through line count, file count (both descending) and label.
pub fn execution_order(shards: &[Shard]) -> Vec<&Shard> {
    let mut ordered: Vec<&Shard> = shards.iter().collect();
    ordered.sort_by(|a, b| {
        b.cost_ms
            .total_cmp(&a.cost_ms)
            .then_with(|| b.line_count.cmp(&a.line_count))
            .then_with(|| b.file_count().cmp(&a.file_count()))
            .then_with(|| a.label.cmp(&b.label))
    });
    ordered
}

fn share(part: f64, total: f64) -> f64 {
    if total > 0.0 { part / total } else { 0.0 }
}

/// Cut shards into work items.
///
/// A shard holding more than 5% of the files, lines, bytes or cost becomes
/// two parts, more than 10% four parts (never more parts than files).
pub fn build_work_plan(shards: &[Shard]) -> Vec<WorkItem<'_>> {
    let total_files = shards.iter().map(Shard::file_count).sum::<usize>() as f64;
    let total_lines = shards.iter().map(|s| s.line_count).sum::<u64>() as f64;
    let total_bytes = shards.iter().map(|s| s.byte_count).sum::<u64>() as f64;
    let total_cost: f64 = shards.iter().map(|s| s.cost_ms).sum();

    let mut work = Vec::new();
    for (position, shard) in execution_order(shards).into_iter().enumerate() {
        let file_count = shard.file_count();
        let largest_share = share(file_count as f64, total_files)
            .max(share(shard.line_count as f64, total_lines))
            .max(share(shard.byte_count as f64, total_bytes))
            .max(share(shard.cost_ms, total_cost));

        let mut parts = if largest_share > SPLIT_SHARE_LARGE {
            4
        } else if largest_share > SPLIT_SHARE {
            2
        } else {
            1
        };
        parts = parts.min(file_count.max(1));

        let cost_per_file = if file_count > 0 {
            shard.cost_ms / file_count as f64
        } else {
            0.0
        };

        if parts <= 1 {
            work.push(WorkItem {
                shard,
                entries: &shard.entries,
                part_index: 1,
                part_total: 1,
                predicted_cost_ms: shard.cost_ms,
                shard_index: position + 1,
            });
            continue;
        }

        let per_part = file_count.div_ceil(parts);
        for (i, entries) in shard.entries.chunks(per_part).enumerate() {
            let predicted_cost_ms = if cost_per_file > 0.0 {
                cost_per_file * entries.len() as f64
            } else {
                shard.cost_ms / parts as f64
            };
            work.push(WorkItem {
                shard,
                entries,
                part_index: i + 1,
                part_total: parts,
                predicted_cost_ms,
                shard_index: position + 1,
            });
        }
    }
    work
}

/// Pack work items into at most `workers` batches, longest first.
///
/// Each item goes to the currently lightest batch (lowest index on ties);
/// items of equal weight are placed in tie-breaker order. Empty batches are
/// dropped.
pub fn plan_batches<'a>(items: &[WorkItem<'a>], workers: usize) -> Vec<Vec<WorkItem<'a>>> {
    let workers = workers.max(1).min(items.len().max(1));
    let mut sorted: Vec<&WorkItem<'a>> = items.iter().collect();
    sorted.sort_by(|a, b| {
        b.weight()
            .total_cmp(&a.weight())
            .then_with(|| a.tie_breaker().cmp(&b.tie_breaker()))
    });

    let mut batches: Vec<Vec<WorkItem<'a>>> = vec![Vec::new(); workers];
    let mut loads = vec![0.0f64; workers];
    for item in sorted {
        let lightest = loads
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ia.cmp(ib)))
            .map_or(0, |(index, _)| index);
        loads[lightest] += item.weight();
        batches[lightest].push(item.clone());
    }
    batches.retain(|batch| !batch.is_empty());
    batches
}

/// Predicted load of a batch
pub fn batch_weight(batch: &[WorkItem<'_>]) -> f64 {
    batch.iter().map(WorkItem::weight).sum()
}
