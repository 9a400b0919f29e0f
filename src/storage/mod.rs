//! Time-series storage implementation: out-of-order ingestion and partition merge.

use std::path::PathBuf;

mod bucket;
mod column;
mod errors;
mod files;
mod locate;
mod logging;
mod merge;
mod normalize;
mod plan;
mod publish;
mod row_builder;
mod scan_partitions;
mod schema;
mod symbol_table;
mod table;
mod txn;
mod version;

#[cfg(test)]
mod tests;

pub use errors::Error;
pub use files::{ColumnFile, FileKind, FsStorage, StorageBackend};
pub use merge::{CommitResult, PartitionFailure, PartitionOutcome};
pub use plan::{MergePlan, MergeStrategy, PartitionTask};
pub use publish::PartitionList;
pub use row_builder::{Row, RowBatchBuilder};
pub use scan_partitions::TableReader;
pub use schema::{ColumnDef, ColumnType, TableMetadata};
pub use symbol_table::{SymbolDictionary, SymbolTable};
pub use table::{Table, TableStats, TableWriter};
pub use txn::{SequenceLedger, TxnLedger};
pub use version::{DataDir, PartitionVersion, PartitionVersionRef};

/// Designated timestamp value that marks a missing timestamp.
pub const TIMESTAMP_NULL: i64 = i64::MIN;

/// Time bucket size used to derive partition keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PartitionGranularity {
    Minute,
    Hour,
    #[default]
    Day,
    Month,
    Year,
}

/// Configuration for storage engine
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub partition_granularity: PartitionGranularity,
    /// Partition-size policy; a merge producing more rows than this splits.
    pub max_partition_rows: Option<usize>,
    /// Worker threads used to prepare independent partition tasks.
    pub merge_workers: usize,
    pub fsync: bool,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            partition_granularity: PartitionGranularity::Day,
            max_partition_rows: None,
            merge_workers: 1,
            fsync: true,
        }
    }
}
