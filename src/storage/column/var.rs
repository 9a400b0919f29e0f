use std::ops::Range;
use std::sync::Arc;

use arrow::array::{ArrayRef, BinaryArray, StringArray};
use arrow_array::cast::AsArray;

use super::RowSource;
use crate::storage::{ColumnType, Error};

/// Offset stored for a null row; a null row writes no data.
const NULL_OFFSET: i64 = -1;

const LEN_PREFIX: usize = 4;

/// Row-indexed offsets plus a blob of length-prefixed payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct VarColumn {
    offsets: Vec<i64>,
    data: Vec<u8>,
}

impl VarColumn {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[cfg(test)]
    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn value(&self, row: usize) -> Option<&[u8]> {
        let offset = self.offsets[row];
        if offset == NULL_OFFSET {
            return None;
        }
        let start = offset as usize;
        let len = read_len(&self.data[start..start + LEN_PREFIX]);
        Some(&self.data[start + LEN_PREFIX..start + LEN_PREFIX + len])
    }

    pub fn push(&mut self, value: Option<&[u8]>) {
        match value {
            None => self.offsets.push(NULL_OFFSET),
            // payloads come from i32-offset arrow arrays or u32-prefixed files
            Some(payload) => {
                self.offsets.push(self.data.len() as i64);
                self.data
                    .extend_from_slice(&(payload.len() as u32).to_le_bytes());
                self.data.extend_from_slice(payload);
            }
        }
    }

    fn stored_size(&self, row: usize) -> usize {
        self.value(row).map_or(0, |payload| LEN_PREFIX + payload.len())
    }

    /// Two passes: size the new blob from the selected rows, then copy.
    pub fn gather(existing: &Self, batch: &Self, order: &[RowSource]) -> Result<Self, Error> {
        let total: usize = order
            .iter()
            .map(|source| match *source {
                RowSource::Existing(row) => existing.stored_size(row as usize),
                RowSource::Batch(row) => batch.stored_size(row as usize),
            })
            .sum();

        let mut column = Self::default();
        column.offsets.try_reserve_exact(order.len())?;
        column.data.try_reserve_exact(total)?;
        for source in order {
            let value = match *source {
                RowSource::Existing(row) => existing.value(row as usize),
                RowSource::Batch(row) => batch.value(row as usize),
            };
            column.push(value);
        }
        Ok(column)
    }

    pub fn slice(&self, rows: Range<usize>) -> Self {
        let mut column = Self::default();
        for row in rows {
            column.push(self.value(row));
        }
        column
    }

    pub fn extend_from(&mut self, other: &Self) -> Result<(), Error> {
        self.offsets.try_reserve(other.offsets.len())?;
        self.data.try_reserve(other.data.len())?;
        for row in 0..other.len() {
            self.push(other.value(row));
        }
        Ok(())
    }

    pub fn encode_offsets(&self, base: i64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.offsets.len() * 8);
        for &offset in &self.offsets {
            let stored = if offset == NULL_OFFSET { NULL_OFFSET } else { offset + base };
            bytes.extend_from_slice(&stored.to_le_bytes());
        }
        bytes
    }

    /// Rebuilds a column from persisted files. Every non-null offset must
    /// start where the previous payload ended; bytes past the last payload
    /// belong to an aborted append and are dropped.
    pub fn decode(
        offsets: &[u8],
        mut data: Vec<u8>,
        partition: &str,
        column: &str,
    ) -> Result<Self, Error> {
        let offsets: Vec<i64> = decode_offsets(offsets);
        let mut end = 0usize;
        for (row, &offset) in offsets.iter().enumerate() {
            if offset == NULL_OFFSET {
                continue;
            }
            if usize::try_from(offset).ok() != Some(end) || end + LEN_PREFIX > data.len() {
                return Err(Error::corrupt(
                    partition,
                    format!(
                        "column '{}' row {} offset {} outside data, expected {}",
                        column, row, offset, end
                    ),
                ));
            }
            end += LEN_PREFIX + read_len(&data[end..end + LEN_PREFIX]);
            if end > data.len() {
                return Err(Error::corrupt(
                    partition,
                    format!("column '{}' row {} payload overruns data", column, row),
                ));
            }
        }
        data.truncate(end);
        Ok(Self { offsets, data })
    }

    pub fn from_arrow(array: &ArrayRef, column_type: ColumnType) -> Result<Self, Error> {
        let mut column = Self::default();
        match column_type {
            ColumnType::String => {
                for value in array.as_string::<i32>().iter() {
                    column.push(value.map(str::as_bytes));
                }
            }
            ColumnType::Binary => {
                for value in array.as_binary::<i32>().iter() {
                    column.push(value);
                }
            }
            other => {
                return Err(Error::SchemaMismatch(format!(
                    "{:?} is not a variable-length column type",
                    other
                )));
            }
        }
        Ok(column)
    }

    pub fn to_arrow(&self, column_type: ColumnType, partition: &str) -> Result<ArrayRef, Error> {
        match column_type {
            ColumnType::String => {
                let values = (0..self.len())
                    .map(|row| {
                        self.value(row)
                            .map(std::str::from_utf8)
                            .transpose()
                            .map_err(|e| Error::corrupt(partition, format!("invalid utf-8: {}", e)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(StringArray::from(values)))
            }
            ColumnType::Binary => {
                let values: Vec<Option<&[u8]>> =
                    (0..self.len()).map(|row| self.value(row)).collect();
                Ok(Arc::new(BinaryArray::from(values)))
            }
            other => Err(Error::SchemaMismatch(format!(
                "{:?} is not a variable-length column type",
                other
            ))),
        }
    }
}

fn decode_offsets(bytes: &[u8]) -> Vec<i64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            i64::from_le_bytes(buf)
        })
        .collect()
}

fn read_len(bytes: &[u8]) -> usize {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}
