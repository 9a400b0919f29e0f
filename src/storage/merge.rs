//! Merge executor: runs planned tasks and publishes their outputs in partition order.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::column::{row_index, ColumnCodec, ColumnData, CommittedLen, FixedColumn, RowSource};
use super::files::StorageBackend;
use super::logging::storage_log;
use super::normalize::NormalizedBatch;
use super::plan::{MergePlan, MergeStrategy, PartitionTask};
use super::publish::{PartitionList, Publisher};
use super::txn::TxnLedger;
use super::version::{DataDir, PartitionVersion, PartitionVersionRef};
use super::{Error, TableMetadata, TIMESTAMP_NULL};

/// A task whose outputs were published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub partition: String,
    pub strategy: MergeStrategy,
    pub rows_added: usize,
    pub generation: u64,
    /// Partitions listed after the publish, in order.
    pub outputs: Vec<String>,
    /// Source partitions removed because no rows were left for them.
    pub collapsed: Vec<String>,
}

/// A task that was aborted; its sources keep their previous generation.
#[derive(Debug)]
pub struct PartitionFailure {
    pub bucket: String,
    pub partitions: Vec<String>,
    pub error: Error,
}

#[derive(Debug)]
pub struct CommitResult {
    pub partitions_touched: Vec<PartitionOutcome>,
    pub failed: Vec<PartitionFailure>,
    /// Set when the table minimum moved.
    pub new_table_min_timestamp: Option<i64>,
    /// [`TIMESTAMP_NULL`] for an empty table.
    pub new_table_max_timestamp: i64,
    /// Partition-list transaction after the last publish.
    pub txn: u64,
}

impl CommitResult {
    fn unchanged(list: &PartitionList) -> Self {
        Self {
            partitions_touched: Vec::new(),
            failed: Vec::new(),
            new_table_min_timestamp: None,
            new_table_max_timestamp: list.max_timestamp().unwrap_or(TIMESTAMP_NULL),
            txn: list.txn(),
        }
    }

    /// True when every planned task was published.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn rows_added(&self) -> usize {
        self.partitions_touched.iter().map(|o| o.rows_added).sum()
    }
}

/// Outputs of a task that ran but is not yet published, plus how to undo it.
struct PreparedTask {
    outputs: Vec<PartitionVersionRef>,
    undo: Undo,
}

enum Undo {
    Truncate {
        dir: String,
        committed: Vec<CommittedLen>,
    },
    RemoveDirs(Vec<String>),
}

pub(crate) struct MergeExecutor<'a> {
    pub metadata: &'a TableMetadata,
    pub codecs: &'a [ColumnCodec],
    pub storage: &'a dyn StorageBackend,
    pub publisher: &'a Publisher,
    pub ledger: &'a dyn TxnLedger,
    pub workers: usize,
}

impl MergeExecutor<'_> {
    pub fn execute(&self, plan: MergePlan) -> Result<CommitResult, Error> {
        let before = self.publisher.snapshot();
        if before.txn() != plan.planned_txn() {
            return Err(Error::StalePlan {
                planned: plan.planned_txn(),
                current: before.txn(),
            });
        }
        if plan.is_empty() {
            return Ok(CommitResult::unchanged(&before));
        }

        let txns: Vec<u64> = plan.tasks().iter().map(|_| self.ledger.begin()).collect();
        let prepared = self.prepare_all(&plan, &txns);

        let mut result = CommitResult::unchanged(&before);
        for ((task, txn), prepared) in plan.tasks().iter().zip(txns).zip(prepared) {
            match prepared.and_then(|p| self.publish(task, txn, p)) {
                Ok(outcome) => result.partitions_touched.push(outcome),
                Err(error) => {
                    if matches!(error, Error::CorruptPartition { .. }) {
                        storage_log!(
                            log::Level::Error,
                            "task_failed",
                            "bucket={} partitions={:?} error={}",
                            task.bucket_name(),
                            task.source_names(),
                            error
                        );
                    } else {
                        storage_log!(
                            log::Level::Warn,
                            "task_failed",
                            "bucket={} partitions={:?} error={}",
                            task.bucket_name(),
                            task.source_names(),
                            error
                        );
                    }
                    result.failed.push(PartitionFailure {
                        bucket: task.bucket_name().to_string(),
                        partitions: task.source_names(),
                        error,
                    });
                }
            }
        }

        let after = self.publisher.snapshot();
        if after.min_timestamp() != before.min_timestamp() {
            result.new_table_min_timestamp = after.min_timestamp();
        }
        result.new_table_max_timestamp = after.max_timestamp().unwrap_or(TIMESTAMP_NULL);
        result.txn = after.txn();
        Ok(result)
    }

    /// Runs every task's I/O, on worker threads when configured.
    fn prepare_all(&self, plan: &MergePlan, txns: &[u64]) -> Vec<Result<PreparedTask, Error>> {
        let tasks = plan.tasks();
        let workers = self.workers.clamp(1, tasks.len().max(1));
        if workers == 1 {
            return tasks
                .iter()
                .zip(txns)
                .map(|(task, &txn)| self.prepare(plan, task, txn))
                .collect();
        }

        let slots: Vec<Mutex<Option<Result<PreparedTask, Error>>>> =
            tasks.iter().map(|_| Mutex::new(None)).collect();
        let next = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= tasks.len() {
                        break;
                    }
                    *slots[idx].lock() = Some(self.prepare(plan, &tasks[idx], txns[idx]));
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner().unwrap_or_else(|| {
                    Err(Error::IoFailure(std::io::Error::other("merge worker stopped early")))
                })
            })
            .collect()
    }

    fn prepare(
        &self,
        plan: &MergePlan,
        task: &PartitionTask,
        txn: u64,
    ) -> Result<PreparedTask, Error> {
        if task.strategy().is_append() {
            if let [source] = task.sources() {
                return self.append(plan, task, source, txn);
            }
        }
        self.rewrite(plan, task, txn)
    }

    /// Extends the source's files in place; readers only see `row_count` rows.
    fn append(
        &self,
        plan: &MergePlan,
        task: &PartitionTask,
        source: &PartitionVersionRef,
        txn: u64,
    ) -> Result<PreparedTask, Error> {
        let dir = source.dir();
        let committed = self
            .codecs
            .iter()
            .map(|codec| codec.committed(self.storage, dir, source.row_count, &source.name))
            .collect::<Result<Vec<_>, _>>()?;

        let batch = plan.batch();
        let rows = task.rows();
        for (idx, codec) in self.codecs.iter().enumerate() {
            let slice = batch.column_slice(idx, rows.clone());
            if let Err(e) = codec.append(self.storage, dir, committed[idx], &slice) {
                self.truncate(dir, &committed);
                return Err(e);
            }
        }

        let timestamps = &batch.timestamps[rows.clone()];
        let output = PartitionVersion {
            name: source.name.clone(),
            bucket: source.bucket,
            min_ts: source.min_ts,
            max_ts: timestamps.last().copied().unwrap_or(source.max_ts),
            row_count: source.row_count + rows.len(),
            generation: txn,
            data_dir: Arc::clone(&source.data_dir),
        };
        Ok(PreparedTask {
            outputs: vec![Arc::new(output)],
            undo: Undo::Truncate {
                dir: dir.to_string(),
                committed,
            },
        })
    }

    /// Merges sources with the batch slice into fresh directories.
    fn rewrite(
        &self,
        plan: &MergePlan,
        task: &PartitionTask,
        txn: u64,
    ) -> Result<PreparedTask, Error> {
        let sources = task.sources();
        for source in sources {
            for codec in self.codecs {
                codec.committed(self.storage, source.dir(), source.row_count, &source.name)?;
            }
        }

        let ts_index = self.metadata.timestamp_index();
        let mut existing_ts = Vec::new();
        for source in sources {
            let column = self.codecs[ts_index].read(
                self.storage,
                source.dir(),
                source.row_count,
                &source.name,
            )?;
            let timestamps = match column {
                ColumnData::Fixed(column) => column.as_i64s(),
                _ => {
                    return Err(Error::corrupt(
                        &source.name,
                        "timestamp column is not fixed width",
                    ));
                }
            };
            check_timestamps(source, &timestamps)?;
            existing_ts.extend(timestamps);
        }

        let batch = plan.batch();
        let rows = task.rows();
        let order = merge_order(&existing_ts, &batch.timestamps[rows.clone()])?;
        let merged_ts: Vec<i64> = order
            .iter()
            .map(|source| match *source {
                RowSource::Existing(row) => existing_ts[row as usize],
                RowSource::Batch(row) => batch.timestamps[rows.start + row as usize],
            })
            .collect();
        let cuts = cut_points(&merged_ts, task.strategy().planned_outputs());

        let outputs: Vec<PartitionVersion> = cuts
            .iter()
            .enumerate()
            .map(|(k, range)| {
                let name = match sources.get(k) {
                    Some(source) => source.name.clone(),
                    None if k == 0 => task.bucket_name().to_string(),
                    None => format!("{}-{}-{}", task.bucket_name(), txn, k),
                };
                PartitionVersion {
                    data_dir: Arc::new(DataDir::new(&name, txn)),
                    name,
                    bucket: task.bucket(),
                    min_ts: merged_ts[range.start],
                    max_ts: merged_ts[range.end - 1],
                    row_count: range.len(),
                    generation: txn,
                }
            })
            .collect();
        let dirs: Vec<String> = outputs.iter().map(|out| out.dir().to_string()).collect();

        let written = self.write_outputs(batch, task, &order, &merged_ts, &cuts, &dirs);
        if let Err(e) = written {
            self.remove_dirs(&dirs);
            return Err(e);
        }

        Ok(PreparedTask {
            outputs: outputs.into_iter().map(Arc::new).collect(),
            undo: Undo::RemoveDirs(dirs),
        })
    }

    /// Gathers one column at a time and writes its slice of every output.
    fn write_outputs(
        &self,
        batch: &NormalizedBatch,
        task: &PartitionTask,
        order: &[RowSource],
        merged_ts: &[i64],
        cuts: &[Range<usize>],
        dirs: &[String],
    ) -> Result<(), Error> {
        for dir in dirs {
            self.storage.create_dir(dir)?;
        }

        let sources = task.sources();
        let ts_index = self.metadata.timestamp_index();
        for (idx, codec) in self.codecs.iter().enumerate() {
            let merged = if idx == ts_index {
                ColumnData::Fixed(FixedColumn::from_i64s(merged_ts))
            } else if sources.is_empty() {
                batch.column_slice(idx, task.rows())
            } else {
                let mut existing = codec.empty();
                for source in sources {
                    let column =
                        codec.read(self.storage, source.dir(), source.row_count, &source.name)?;
                    existing.extend_from(&column)?;
                }
                let slice = batch.column_slice(idx, task.rows());
                ColumnData::gather(&existing, &slice, order)?
            };

            for (range, dir) in cuts.iter().zip(dirs) {
                if cuts.len() == 1 {
                    codec.write(self.storage, dir, &merged)?;
                } else {
                    codec.write(self.storage, dir, &merged.slice(range.clone()))?;
                }
            }
        }
        Ok(())
    }

    fn publish(
        &self,
        task: &PartitionTask,
        txn: u64,
        prepared: PreparedTask,
    ) -> Result<PartitionOutcome, Error> {
        let outputs = prepared.outputs.clone();
        if let Err(e) = self.publisher.publish(txn, task.sources(), prepared.outputs) {
            self.undo(prepared.undo);
            return Err(e);
        }
        self.ledger.commit(txn);

        for out in &outputs {
            storage_log!(
                log::Level::Info,
                "partition_published",
                "partition={} generation={} rows={} min_ts={} max_ts={} strategy={:?}",
                out.name,
                out.generation,
                out.row_count,
                out.min_time(),
                out.max_time(),
                task.strategy()
            );
        }
        let collapsed: Vec<String> = task
            .sources()
            .iter()
            .filter(|source| !outputs.iter().any(|out| out.name == source.name))
            .map(|source| source.name.clone())
            .collect();
        for name in &collapsed {
            storage_log!(
                log::Level::Info,
                "partition_collapsed",
                "partition={} generation={}",
                name,
                txn
            );
        }

        Ok(PartitionOutcome {
            partition: task.partition_name().to_string(),
            strategy: task.strategy(),
            rows_added: task.batch_rows(),
            generation: txn,
            outputs: outputs.iter().map(|out| out.name.clone()).collect(),
            collapsed,
        })
    }

    fn undo(&self, undo: Undo) {
        match undo {
            Undo::Truncate { dir, committed } => self.truncate(&dir, &committed),
            Undo::RemoveDirs(dirs) => self.remove_dirs(&dirs),
        }
    }

    fn truncate(&self, dir: &str, committed: &[CommittedLen]) {
        for (codec, len) in self.codecs.iter().zip(committed) {
            if let Err(e) = codec.rollback(self.storage, dir, *len) {
                storage_log!(
                    log::Level::Warn,
                    "rollback_failed",
                    "dir={} column={} error={}",
                    dir,
                    codec.name(),
                    e
                );
            }
        }
    }

    fn remove_dirs(&self, dirs: &[String]) {
        for dir in dirs {
            if let Err(e) = self.storage.remove_dir(dir) {
                storage_log!(log::Level::Warn, "cleanup_failed", "dir={} error={}", dir, e);
            }
        }
    }
}

fn check_timestamps(source: &PartitionVersion, timestamps: &[i64]) -> Result<(), Error> {
    let ordered = timestamps.windows(2).all(|pair| pair[0] <= pair[1]);
    let bounded = timestamps.first() == Some(&source.min_ts)
        && timestamps.last() == Some(&source.max_ts);
    if ordered && bounded {
        Ok(())
    } else {
        Err(Error::corrupt(
            &source.name,
            format!(
                "timestamps disagree with recorded range [{}, {}]",
                source.min_ts, source.max_ts
            ),
        ))
    }
}

/// Interleaves existing and batch rows by timestamp; existing rows win ties.
pub(crate) fn merge_order(existing: &[i64], batch: &[i64]) -> Result<Vec<RowSource>, Error> {
    let mut order = Vec::new();
    order.try_reserve_exact(existing.len() + batch.len())?;

    let (mut e, mut b) = (0, 0);
    while e < existing.len() && b < batch.len() {
        if existing[e] <= batch[b] {
            order.push(RowSource::Existing(row_index(e)?));
            e += 1;
        } else {
            order.push(RowSource::Batch(row_index(b)?));
            b += 1;
        }
    }
    for row in e..existing.len() {
        order.push(RowSource::Existing(row_index(row)?));
    }
    for row in b..batch.len() {
        order.push(RowSource::Batch(row_index(row)?));
    }
    Ok(order)
}

/// Cuts sorted timestamps into at most `outputs` ranges of near-equal size.
/// A cut never separates equal timestamps, so output ranges stay disjoint.
pub(crate) fn cut_points(timestamps: &[i64], outputs: usize) -> Vec<Range<usize>> {
    let total = timestamps.len();
    if outputs <= 1 || total == 0 {
        return vec![0..total];
    }

    let target = total.div_ceil(outputs);
    let mut ranges = Vec::with_capacity(outputs);
    let mut start = 0;
    while start < total {
        let mut end = (start + target).min(total);
        while end < total && timestamps[end] == timestamps[end - 1] {
            end += 1;
        }
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_rows_win_ties() {
        let order = merge_order(&[10, 20, 20, 30], &[5, 20, 40]).unwrap();
        assert_eq!(
            order,
            vec![
                RowSource::Batch(0),
                RowSource::Existing(0),
                RowSource::Existing(1),
                RowSource::Existing(2),
                RowSource::Batch(1),
                RowSource::Existing(3),
                RowSource::Batch(2),
            ]
        );
    }

    #[test]
    fn prepend_order_is_batch_then_existing() {
        let order = merge_order(&[10, 11], &[1, 2]).unwrap();
        assert_eq!(
            order,
            vec![
                RowSource::Batch(0),
                RowSource::Batch(1),
                RowSource::Existing(0),
                RowSource::Existing(1),
            ]
        );
    }

    #[test]
    fn row_positions_past_u32_are_rejected() {
        assert_eq!(row_index(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            row_index(u32::MAX as usize + 1),
            Err(Error::OutOfSpace(_))
        ));
    }

    #[test]
    fn cuts_are_even_and_skip_ties() {
        let ts: Vec<i64> = (0..10).collect();
        assert_eq!(cut_points(&ts, 3), vec![0..4, 4..8, 8..10]);

        let ties = [1, 1, 1, 1, 2, 3];
        assert_eq!(cut_points(&ties, 3), vec![0..4, 4..6]);

        let all_equal = [7; 5];
        assert_eq!(cut_points(&all_equal, 2), vec![0..5]);

        assert_eq!(cut_points(&[], 4), vec![0..0]);
        assert_eq!(cut_points(&ts, 1), vec![0..10]);
    }
}
