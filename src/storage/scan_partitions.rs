use std::sync::Arc;

use arrow::array::TimestampNanosecondArray;
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use arrow_array::cast::AsArray;
use arrow_array::BooleanArray;
use arrow::datatypes::{Schema, TimestampNanosecondType};

use super::publish::PartitionList;
use super::version::PartitionVersion;
use super::{Error, Table};

/// Reads a table through one pinned partition-list snapshot.
///
/// The snapshot never changes underneath the reader; `is_stale` tells when the
/// writer has published since, and `reload` moves to the latest list.
pub struct TableReader<'a> {
    table: &'a Table,
    snapshot: Arc<PartitionList>,
}

impl<'a> TableReader<'a> {
    pub(crate) fn new(table: &'a Table, snapshot: Arc<PartitionList>) -> Self {
        Self { table, snapshot }
    }

    pub fn snapshot(&self) -> &Arc<PartitionList> {
        &self.snapshot
    }

    pub fn txn(&self) -> u64 {
        self.snapshot.txn()
    }

    pub fn is_stale(&self) -> bool {
        self.table.snapshot().txn() != self.snapshot.txn()
    }

    pub fn reload(&mut self) {
        self.snapshot = self.table.snapshot();
    }

    /// Generation of `name` as seen by this reader.
    pub fn partition_generation(&self, name: &str) -> Option<u64> {
        self.snapshot.get(name).map(|p| p.generation)
    }

    pub fn read_partition(&self, name: &str) -> Result<RecordBatch, Error> {
        let version = self
            .snapshot
            .get(name)
            .ok_or_else(|| Error::InvalidPartition(name.to_string()))?;
        self.table.read_version(version)
    }

    /// Rows with `min_ts <= ts <= max_ts`, one batch per overlapping partition.
    pub fn scan(
        &self,
        min_ts: Option<i64>,
        max_ts: Option<i64>,
        selected_columns: Option<&[String]>,
    ) -> Result<Vec<RecordBatch>, Error> {
        let schema = self.table.schema();
        let projection = selected_columns
            .map(|cols| projection_indices(schema, cols))
            .transpose()?;
        let mut results = Vec::new();
        for version in self.snapshot.partitions() {
            if !version.overlaps(min_ts, max_ts) {
                continue;
            }
            let batch = self.scan_version(version, min_ts, max_ts)?;
            if batch.num_rows() == 0 {
                continue;
            }
            results.push(match &projection {
                Some(indices) => batch.project(indices)?,
                None => batch,
            });
        }
        Ok(results)
    }

    /// Every row of the snapshot in timestamp order as one batch.
    pub fn read_all(&self) -> Result<RecordBatch, Error> {
        let batches = self.scan(None, None, None)?;
        Ok(concat_batches(self.table.schema(), &batches)?)
    }

    fn scan_version(
        &self,
        version: &PartitionVersion,
        min_ts: Option<i64>,
        max_ts: Option<i64>,
    ) -> Result<RecordBatch, Error> {
        let batch = self.table.read_version(version)?;
        let inside = min_ts.is_none_or(|min| version.min_ts >= min)
            && max_ts.is_none_or(|max| version.max_ts <= max);
        if inside {
            return Ok(batch);
        }

        let ts_index = self.table.metadata().timestamp_index();
        let timestamps: &TimestampNanosecondArray =
            batch.column(ts_index).as_primitive::<TimestampNanosecondType>();
        let mask: BooleanArray = timestamps
            .values()
            .iter()
            .map(|&ts| {
                Some(min_ts.is_none_or(|min| ts >= min) && max_ts.is_none_or(|max| ts <= max))
            })
            .collect();
        Ok(filter_record_batch(&batch, &mask)?)
    }
}

/// Schema positions of `selected_columns`; an unknown name is a schema mismatch.
fn projection_indices(schema: &Schema, selected_columns: &[String]) -> Result<Vec<usize>, Error> {
    selected_columns
        .iter()
        .map(|col| {
            schema
                .index_of(col)
                .map_err(|_| Error::SchemaMismatch(format!("no column named '{}'", col)))
        })
        .collect()
}
