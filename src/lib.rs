//! Out-of-order ingestion and partition merge for a columnar, timestamp
//! partitioned time-series table.

pub mod storage;

pub use storage::{
    CommitResult, Error, MergePlan, MergeStrategy, PartitionGranularity, RowBatchBuilder,
    StorageConfig, Table, TableMetadata, TableReader,
};
