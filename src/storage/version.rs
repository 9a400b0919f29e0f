use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Storage directory holding one generation of a partition's column files.
///
/// Shared by every version that reads from it (in-place appends keep the
/// directory); it is safe to delete once no version references it.
#[derive(Debug, PartialEq, Eq)]
pub struct DataDir {
    pub name: String,
    pub txn: u64,
}

impl DataDir {
    pub fn new(partition: &str, txn: u64) -> Self {
        Self {
            name: format!("{}.{}", partition, txn),
            txn,
        }
    }
}

/// Immutable published state of one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionVersion {
    pub name: String,
    /// Start of the time bucket the partition belongs to.
    pub bucket: i64,
    pub min_ts: i64,
    pub max_ts: i64,
    pub row_count: usize,
    /// Ledger transaction of the publish that produced this version.
    pub generation: u64,
    pub data_dir: Arc<DataDir>,
}

pub type PartitionVersionRef = Arc<PartitionVersion>;

impl PartitionVersion {
    pub fn dir(&self) -> &str {
        &self.data_dir.name
    }

    pub fn min_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.min_ts)
    }

    pub fn max_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.max_ts)
    }

    pub fn overlaps(&self, min_ts: Option<i64>, max_ts: Option<i64>) -> bool {
        let matches_min = min_ts.is_none_or(|min| self.max_ts >= min);
        let matches_max = max_ts.is_none_or(|max| self.min_ts <= max);
        matches_min && matches_max
    }
}
