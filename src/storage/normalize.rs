//! Sorted batch normalizer: validates an incoming batch, orders it by
//! timestamp (stable on ties) and converts it into codec shape.

use std::ops::Range;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::TimestampNanosecondType;
use arrow::record_batch::RecordBatch;
use arrow_array::cast::AsArray;
use arrow_ord::sort::{lexsort_to_indices, SortColumn};

use super::column::{row_index, ColumnCodec, ColumnData};
use super::symbol_table::SymbolDictionary;
use super::{Error, TableMetadata, TIMESTAMP_NULL};

/// A batch sorted by timestamp with every column in codec shape.
#[derive(Clone, Debug)]
pub(crate) struct NormalizedBatch {
    pub timestamps: Vec<i64>,
    pub columns: Vec<ColumnData>,
}

impl NormalizedBatch {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn min_ts(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn max_ts(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    pub fn column_slice(&self, column: usize, rows: Range<usize>) -> ColumnData {
        if rows.start == 0 && rows.end == self.len() {
            return self.columns[column].clone();
        }
        self.columns[column].slice(rows)
    }
}

pub(crate) fn normalize(
    batch: &RecordBatch,
    metadata: &TableMetadata,
    codecs: &[ColumnCodec],
    dictionary: &dyn SymbolDictionary,
) -> Result<NormalizedBatch, Error> {
    metadata.validate_batch_schema(batch.schema().as_ref())?;

    let ts_index = metadata.timestamp_index();
    let ts_column = batch.column(ts_index);
    let timestamps = ts_column.as_primitive::<TimestampNanosecondType>();
    if let Some(row) = (0..timestamps.len())
        .find(|&row| timestamps.is_null(row) || timestamps.value(row) == TIMESTAMP_NULL)
    {
        return Err(Error::InvalidTimestamp(format!(
            "row {} of batch has a null designated timestamp",
            row
        )));
    }

    let values = timestamps.values();
    let sorted = values.windows(2).all(|pair| pair[0] <= pair[1]);
    let columns: Vec<ArrayRef> = if sorted {
        batch.columns().to_vec()
    } else {
        let indices = stable_sort_indices(ts_column)?;
        batch
            .columns()
            .iter()
            .map(|column| take(column.as_ref(), &indices, None))
            .collect::<Result<_, _>>()?
    };

    let timestamps = columns[ts_index]
        .as_primitive::<TimestampNanosecondType>()
        .values()
        .to_vec();

    let columns = codecs
        .iter()
        .zip(&columns)
        .map(|(codec, array)| codec.from_arrow(array, dictionary))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NormalizedBatch { timestamps, columns })
}

/// Sorts by (timestamp, arrival position) so equal timestamps keep arrival order.
fn stable_sort_indices(timestamps: &ArrayRef) -> Result<UInt32Array, Error> {
    let rows = row_index(timestamps.len())?;
    let arrival: ArrayRef = Arc::new(UInt32Array::from_iter_values(0..rows));
    let indices = lexsort_to_indices(
        &[
            SortColumn {
                values: Arc::clone(timestamps),
                options: None,
            },
            SortColumn {
                values: arrival,
                options: None,
            },
        ],
        None,
    )?;
    Ok(indices)
}
