//! Merge planner: turns a normalized batch and the current partition list into
//! one immutable task per touched time bucket.

use std::ops::Range;
use std::sync::Arc;

use super::bucket::{bucket_name, bucket_start, next_bucket_start};
use super::locate::PartitionLocator;
use super::logging::{storage_log, LOG_TARGET};
use super::normalize::NormalizedBatch;
use super::publish::PartitionList;
use super::version::PartitionVersionRef;
use super::{Error, PartitionGranularity};

/// How a task changes the partitions it owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Batch rows land after the partition's max; written in place.
    Append,
    /// Batch rows land before the partition's min.
    Prepend { update_table_min: bool },
    /// Batch rows interleave with existing rows.
    Merge,
    /// Output exceeds the partition-size policy and is cut into `outputs` partitions.
    Split { outputs: usize },
    /// Several partitions of one bucket merge into fewer outputs.
    Collapse { sources: usize, outputs: usize },
    /// Bucket has no partition yet.
    NewPartition,
}

impl MergeStrategy {
    pub fn is_append(&self) -> bool {
        matches!(self, MergeStrategy::Append)
    }

    /// Number of output partitions the planner expects.
    pub fn planned_outputs(&self) -> usize {
        match self {
            MergeStrategy::Split { outputs } | MergeStrategy::Collapse { outputs, .. } => *outputs,
            _ => 1,
        }
    }
}

/// Work for one time bucket.
#[derive(Clone, Debug)]
pub struct PartitionTask {
    bucket: i64,
    bucket_name: String,
    sources: Vec<PartitionVersionRef>,
    rows: Range<usize>,
    strategy: MergeStrategy,
}

impl PartitionTask {
    pub fn bucket(&self) -> i64 {
        self.bucket
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Existing partitions consumed by the task, in partition order.
    pub fn sources(&self) -> &[PartitionVersionRef] {
        &self.sources
    }

    /// Rows of the normalized batch the task writes.
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    pub fn batch_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn existing_rows(&self) -> usize {
        self.sources.iter().map(|p| p.row_count).sum()
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Name of the partition the task is reported under.
    pub fn partition_name(&self) -> &str {
        self.sources
            .first()
            .map_or(self.bucket_name.as_str(), |p| p.name.as_str())
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|p| p.name.clone()).collect()
    }
}

/// Immutable result of planning one batch against one partition list.
#[derive(Debug)]
pub struct MergePlan {
    txn: u64,
    batch: NormalizedBatch,
    tasks: Vec<PartitionTask>,
}

impl MergePlan {
    pub fn tasks(&self) -> &[PartitionTask] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Partition-list transaction the plan was computed against.
    pub fn planned_txn(&self) -> u64 {
        self.txn
    }

    pub fn batch_rows(&self) -> usize {
        self.batch.len()
    }

    pub(crate) fn batch(&self) -> &NormalizedBatch {
        &self.batch
    }
}

pub(crate) fn plan_merge(
    list: &PartitionList,
    batch: NormalizedBatch,
    granularity: PartitionGranularity,
    max_partition_rows: Option<usize>,
) -> Result<MergePlan, Error> {
    let locator = PartitionLocator::new(list.partitions());
    let mut tasks = Vec::new();

    let debug = log::log_enabled!(target: LOG_TARGET, log::Level::Debug);
    if let (true, Some(min_ts), Some(max_ts)) = (debug, batch.min_ts(), batch.max_ts()) {
        let hit = locator.intersecting(min_ts, max_ts);
        storage_log!(
            log::Level::Debug,
            "plan_batch",
            "rows={} intersecting={:?} before_first={} after_last={}",
            batch.len(),
            hit.partitions,
            hit.before_first,
            hit.after_last
        );
    }

    let timestamps = &batch.timestamps;
    let mut start = 0;
    while start < timestamps.len() {
        let bucket = bucket_start(timestamps[start], granularity)?;
        let end = match next_bucket_start(bucket, granularity) {
            Some(boundary) => start + timestamps[start..].partition_point(|&ts| ts < boundary),
            None => timestamps.len(),
        };
        let rows = start..end;

        let in_bucket = locator.bucket_range(bucket);
        let sources: Vec<PartitionVersionRef> = if in_bucket.is_empty() {
            Vec::new()
        } else {
            let first = locator.owner(in_bucket.clone(), timestamps[start]);
            let last = locator.owner(in_bucket, timestamps[end - 1]);
            list.partitions()[first..=last].to_vec()
        };

        let strategy = choose_strategy(
            list,
            &sources,
            &timestamps[rows.clone()],
            max_partition_rows,
        );
        let task = PartitionTask {
            bucket,
            bucket_name: bucket_name(bucket, granularity),
            sources,
            rows,
            strategy,
        };
        storage_log!(
            log::Level::Debug,
            "plan_task",
            "bucket={} partition={} strategy={:?} batch_rows={} existing_rows={}",
            task.bucket_name,
            task.partition_name(),
            task.strategy,
            task.batch_rows(),
            task.existing_rows()
        );
        tasks.push(task);
        start = end;
    }

    Ok(MergePlan {
        txn: list.txn(),
        batch,
        tasks,
    })
}

fn choose_strategy(
    list: &PartitionList,
    sources: &[PartitionVersionRef],
    slice: &[i64],
    max_partition_rows: Option<usize>,
) -> MergeStrategy {
    let existing: usize = sources.iter().map(|p| p.row_count).sum();
    let total = existing + slice.len();
    let outputs = match max_partition_rows {
        Some(max) if max > 0 && total > max => total.div_ceil(max),
        _ => 1,
    };

    if sources.len() > 1 && outputs < sources.len() {
        return MergeStrategy::Collapse {
            sources: sources.len(),
            outputs,
        };
    }
    if outputs > 1 || sources.len() > 1 {
        return MergeStrategy::Split {
            outputs: outputs.max(sources.len()),
        };
    }

    let Some(partition) = sources.first() else {
        return MergeStrategy::NewPartition;
    };
    let (Some(&slice_min), Some(&slice_max)) = (slice.first(), slice.last()) else {
        return MergeStrategy::Merge;
    };
    if slice_min >= partition.max_ts {
        MergeStrategy::Append
    } else if slice_max < partition.min_ts {
        let is_first = list
            .partitions()
            .first()
            .is_some_and(|first| Arc::ptr_eq(first, partition));
        MergeStrategy::Prepend {
            update_table_min: is_first,
        }
    } else {
        MergeStrategy::Merge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::version::{DataDir, PartitionVersion};

    const DAY: i64 = 86_400_000_000_000;

    fn version(name: &str, min_ts: i64, max_ts: i64, rows: usize) -> PartitionVersionRef {
        Arc::new(PartitionVersion {
            name: name.to_string(),
            bucket: min_ts.div_euclid(DAY) * DAY,
            min_ts,
            max_ts,
            row_count: rows,
            generation: 1,
            data_dir: Arc::new(DataDir::new(name, 1)),
        })
    }

    fn list(partitions: Vec<PartitionVersionRef>) -> PartitionList {
        PartitionList::from_parts(7, partitions)
    }

    fn batch(timestamps: Vec<i64>) -> NormalizedBatch {
        NormalizedBatch {
            timestamps,
            columns: Vec::new(),
        }
    }

    fn strategies(plan: &MergePlan) -> Vec<MergeStrategy> {
        plan.tasks().iter().map(|t| t.strategy()).collect()
    }

    fn plan_days(table: &PartitionList, timestamps: Vec<i64>, cap: Option<usize>) -> MergePlan {
        plan_merge(table, batch(timestamps), PartitionGranularity::Day, cap).unwrap()
    }

    #[test]
    fn classifies_single_partition_slices() {
        let table = list(vec![
            version("d1", DAY + 100, DAY + 200, 10),
            version("d3", 3 * DAY + 100, 3 * DAY + 200, 10),
        ]);

        let plan = plan_days(&table, vec![DAY + 200, DAY + 300], None);
        assert_eq!(strategies(&plan), vec![MergeStrategy::Append]);

        let plan = plan_days(&table, vec![DAY + 10, DAY + 20], None);
        assert_eq!(
            strategies(&plan),
            vec![MergeStrategy::Prepend { update_table_min: true }]
        );

        let plan = plan_days(&table, vec![3 * DAY + 10], None);
        assert_eq!(
            strategies(&plan),
            vec![MergeStrategy::Prepend { update_table_min: false }]
        );

        // equal to the existing min: existing row must stay first
        let plan = plan_days(&table, vec![DAY + 100], None);
        assert_eq!(strategies(&plan), vec![MergeStrategy::Merge]);

        let plan = plan_days(&table, vec![2 * DAY + 5], None);
        assert_eq!(strategies(&plan), vec![MergeStrategy::NewPartition]);
        assert_eq!(plan.tasks()[0].bucket_name(), "1970-01-03");
        assert_eq!(plan.planned_txn(), 7);
    }

    #[test]
    fn splits_batch_at_bucket_boundaries() {
        let table = list(vec![
            version("d1", DAY + 100, DAY + 200, 10),
            version("d3", 3 * DAY + 100, 3 * DAY + 200, 10),
        ]);
        let plan = plan_days(
            &table,
            vec![DAY + 150, DAY + 400, 3 * DAY + 50, 3 * DAY + 150],
            None,
        );

        assert_eq!(strategies(&plan), vec![MergeStrategy::Merge, MergeStrategy::Merge]);
        assert_eq!(plan.tasks()[0].rows(), 0..2);
        assert_eq!(plan.tasks()[1].rows(), 2..4);
        assert_eq!(plan.tasks()[1].partition_name(), "d3");
    }

    #[test]
    fn last_bucket_of_the_range_takes_every_remaining_row() {
        let plan = plan_days(
            &PartitionList::default(),
            vec![DAY, i64::MAX - 1, i64::MAX],
            None,
        );
        assert_eq!(plan.tasks().len(), 2);
        assert_eq!(plan.tasks()[1].rows(), 1..3);
        assert_eq!(plan.tasks()[1].bucket_name(), "2262-04-11");
        assert_eq!(plan.tasks()[1].strategy(), MergeStrategy::NewPartition);
    }

    #[test]
    fn size_policy_and_collapse() {
        let table = list(vec![
            version("d1", DAY + 100, DAY + 200, 60),
            version("d1-2-1", DAY + 300, DAY + 400, 60),
        ]);

        let plan = plan_days(&table, vec![DAY + 150], Some(100));
        assert_eq!(strategies(&plan), vec![MergeStrategy::Merge]);

        let plan = plan_days(&table, vec![DAY + 150; 50], Some(100));
        assert_eq!(strategies(&plan), vec![MergeStrategy::Split { outputs: 2 }]);

        // rows owned by both partitions of the bucket
        let plan = plan_days(&table, vec![DAY + 150, DAY + 250], None);
        assert_eq!(
            strategies(&plan),
            vec![MergeStrategy::Collapse { sources: 2, outputs: 1 }]
        );
        assert_eq!(plan.tasks()[0].sources().len(), 2);

        let plan = plan_days(&table, vec![10; 250], Some(100));
        assert_eq!(strategies(&plan), vec![MergeStrategy::Split { outputs: 3 }]);
        assert!(plan.tasks()[0].sources().is_empty());
    }

    #[test]
    fn empty_batch_has_no_tasks() {
        let plan = plan_days(&PartitionList::default(), Vec::new(), None);
        assert!(plan.is_empty());
    }
}
