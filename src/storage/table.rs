use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use super::column::ColumnCodec;
use super::files::{FsStorage, StorageBackend};
use super::logging::storage_log;
use super::merge::{CommitResult, MergeExecutor};
use super::normalize::normalize;
use super::plan::{plan_merge, MergePlan};
use super::publish::{PartitionList, Publisher};
use super::scan_partitions::TableReader;
use super::symbol_table::{SymbolDictionary, SymbolTable};
use super::txn::{SequenceLedger, TxnLedger};
use super::version::{PartitionVersion, PartitionVersionRef};
use super::{Error, StorageConfig, TableMetadata};

/// A partitioned table on top of a storage backend.
///
/// Readers work from pinned [`PartitionList`] snapshots; mutations go through
/// the single [`TableWriter`].
pub struct Table {
    metadata: TableMetadata,
    config: StorageConfig,
    codecs: Vec<ColumnCodec>,
    storage: Arc<dyn StorageBackend>,
    dictionary: Arc<dyn SymbolDictionary>,
    ledger: Arc<dyn TxnLedger>,
    publisher: Publisher,
    writer: Mutex<WriterState>,
    stats: Mutex<TableStats>,
}

struct WriterState {
    max_partition_rows: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub batches: usize,
    pub rows_ingested: usize,
    pub appends: usize,
    pub rewrites: usize,
    pub failed_tasks: usize,
}

impl Table {
    /// Creates an empty table stored under `config.root`.
    pub fn create(metadata: TableMetadata, config: StorageConfig) -> Result<Self, Error> {
        let storage = FsStorage::new(&config.root, config.fsync)?;
        Ok(Self::with_collaborators(
            metadata,
            config,
            Arc::new(storage),
            Arc::new(SymbolTable::new()),
            Arc::new(SequenceLedger::new()),
        ))
    }

    pub fn with_collaborators(
        metadata: TableMetadata,
        config: StorageConfig,
        storage: Arc<dyn StorageBackend>,
        dictionary: Arc<dyn SymbolDictionary>,
        ledger: Arc<dyn TxnLedger>,
    ) -> Self {
        let codecs = ColumnCodec::for_table(&metadata);
        let writer = WriterState {
            max_partition_rows: config.max_partition_rows,
        };
        Self {
            metadata,
            config,
            codecs,
            storage,
            dictionary,
            ledger,
            publisher: Publisher::default(),
            writer: Mutex::new(writer),
            stats: Mutex::new(TableStats::default()),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        self.metadata.arrow_schema()
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &Arc<dyn SymbolDictionary> {
        &self.dictionary
    }

    pub fn stats(&self) -> TableStats {
        self.stats.lock().clone()
    }

    /// Current partition list; stays valid while held.
    pub fn snapshot(&self) -> Arc<PartitionList> {
        self.publisher.snapshot()
    }

    pub fn partitions(&self) -> Vec<PartitionVersionRef> {
        self.snapshot().partitions().to_vec()
    }

    pub fn min_timestamp(&self) -> Option<i64> {
        self.snapshot().min_timestamp()
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        self.snapshot().max_timestamp()
    }

    pub fn row_count(&self) -> usize {
        self.snapshot().row_count()
    }

    /// Blocks until the table's single writer slot is free.
    pub fn writer(&self) -> TableWriter<'_> {
        TableWriter {
            table: self,
            state: self.writer.lock(),
        }
    }

    pub fn try_writer(&self) -> Option<TableWriter<'_>> {
        self.writer.try_lock().map(|state| TableWriter { table: self, state })
    }

    /// Plans and executes one batch under the writer lock.
    pub fn ingest(&self, batch: &RecordBatch) -> Result<CommitResult, Error> {
        let writer = self.writer();
        let plan = writer.plan_merge(batch)?;
        writer.execute_plan(plan)
    }

    pub fn reader(&self) -> TableReader<'_> {
        TableReader::new(self, self.snapshot())
    }

    /// Names of partitions overlapping the given time range.
    pub fn relevant_partitions(
        &self,
        min_time: Option<DateTime<Utc>>,
        max_time: Option<DateTime<Utc>>,
    ) -> Vec<String> {
        let min_ts = min_time.and_then(|t| t.timestamp_nanos_opt());
        let max_ts = max_time.and_then(|t| t.timestamp_nanos_opt());
        self.snapshot()
            .partitions()
            .iter()
            .filter(|p| p.overlaps(min_ts, max_ts))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Loads the committed rows of a partition as a single RecordBatch.
    pub fn load_partition(&self, name: &str) -> Result<RecordBatch, Error> {
        let snapshot = self.snapshot();
        let version = snapshot
            .get(name)
            .ok_or_else(|| Error::InvalidPartition(name.to_string()))?;
        self.read_version(version)
    }

    /// Deletes storage of superseded generations no snapshot still pins.
    pub fn purge_superseded(&self) -> usize {
        let removed = self.publisher.purge(self.storage.as_ref());
        if removed > 0 {
            storage_log!(
                log::Level::Info,
                "purged",
                "table={} dirs={} pending={}",
                self.metadata.name(),
                removed,
                self.publisher.pending_purge()
            );
        }
        removed
    }

    pub fn pending_purge(&self) -> usize {
        self.publisher.pending_purge()
    }

    pub(crate) fn read_version(&self, version: &PartitionVersion) -> Result<RecordBatch, Error> {
        let columns = self
            .codecs
            .iter()
            .map(|codec| {
                let data = codec.read(
                    self.storage.as_ref(),
                    version.dir(),
                    version.row_count,
                    &version.name,
                )?;
                codec.to_arrow(&data, self.dictionary.as_ref(), &version.name)
            })
            .collect::<Result<Vec<_>, Error>>()
            .inspect_err(|e| {
                if matches!(e, Error::CorruptPartition { .. }) {
                    storage_log!(
                        log::Level::Error,
                        "corrupt_partition",
                        "partition={} generation={} error={}",
                        version.name,
                        version.generation,
                        e
                    );
                }
            })?;
        Ok(RecordBatch::try_new(Arc::clone(self.schema()), columns)?)
    }
}

/// Exclusive mutation rights on a table, held across plan and execute.
pub struct TableWriter<'a> {
    table: &'a Table,
    state: MutexGuard<'a, WriterState>,
}

impl TableWriter<'_> {
    /// Normalizes `batch` and plans it against the current partition list.
    /// Interns new symbols; does not touch partition storage.
    pub fn plan_merge(&self, batch: &RecordBatch) -> Result<MergePlan, Error> {
        let table = self.table;
        let normalized =
            normalize(batch, &table.metadata, &table.codecs, table.dictionary.as_ref())?;
        plan_merge(
            &table.snapshot(),
            normalized,
            table.config.partition_granularity,
            self.state.max_partition_rows,
        )
    }

    pub fn execute_plan(&self, plan: MergePlan) -> Result<CommitResult, Error> {
        let table = self.table;
        let batch_rows = plan.batch_rows();
        let executor = MergeExecutor {
            metadata: &table.metadata,
            codecs: &table.codecs,
            storage: table.storage.as_ref(),
            publisher: &table.publisher,
            ledger: table.ledger.as_ref(),
            workers: table.config.merge_workers,
        };
        let result = executor.execute(plan)?;

        let mut stats = table.stats.lock();
        stats.batches += 1;
        stats.rows_ingested += result.rows_added();
        stats.failed_tasks += result.failed.len();
        for outcome in &result.partitions_touched {
            if outcome.strategy.is_append() {
                stats.appends += 1;
            } else {
                stats.rewrites += 1;
            }
        }
        drop(stats);

        storage_log!(
            log::Level::Debug,
            "batch_committed",
            "table={} rows={} touched={} failed={} txn={}",
            table.metadata.name(),
            batch_rows,
            result.partitions_touched.len(),
            result.failed.len(),
            result.txn
        );
        Ok(result)
    }

    pub fn max_partition_rows(&self) -> Option<usize> {
        self.state.max_partition_rows
    }

    /// Changes the partition-size policy for subsequent plans.
    pub fn set_max_partition_rows(&mut self, max_partition_rows: Option<usize>) {
        self.state.max_partition_rows = max_partition_rows;
    }
}
