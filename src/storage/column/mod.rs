//! Column codec adapters: per-shape storage, merge gather and arrow conversion.
//!
//! A column's shape is resolved once into a [`ColumnCodec`]; the merge loop then
//! works on whole [`ColumnData`] values instead of branching per row.

use std::ops::Range;

use arrow::array::ArrayRef;

use super::files::{ColumnFile, FileKind, StorageBackend};
use super::schema::ColumnShape;
use super::symbol_table::SymbolDictionary;
use super::{ColumnType, Error, TableMetadata};

mod fixed;
mod symbol;
mod var;

pub(crate) use fixed::FixedColumn;
pub(crate) use symbol::SymbolColumn;
pub(crate) use var::VarColumn;

/// One step of a shared merge order: which source supplies the next row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowSource {
    Existing(u32),
    Batch(u32),
}

/// Narrows a row position to the `u32` width merge orders and sort indices use.
pub(crate) fn row_index(row: usize) -> Result<u32, Error> {
    u32::try_from(row)
        .map_err(|_| Error::OutOfSpace(format!("row {} is past the u32 row index range", row)))
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ColumnData {
    Fixed(FixedColumn),
    Symbol(SymbolColumn),
    Var(VarColumn),
}

impl ColumnData {
    pub fn gather(existing: &Self, batch: &Self, order: &[RowSource]) -> Result<Self, Error> {
        match (existing, batch) {
            (ColumnData::Fixed(e), ColumnData::Fixed(b)) => {
                Ok(ColumnData::Fixed(FixedColumn::gather(e, b, order)?))
            }
            (ColumnData::Symbol(e), ColumnData::Symbol(b)) => {
                Ok(ColumnData::Symbol(SymbolColumn::gather(e, b, order)?))
            }
            (ColumnData::Var(e), ColumnData::Var(b)) => {
                Ok(ColumnData::Var(VarColumn::gather(e, b, order)?))
            }
            _ => Err(Error::SchemaMismatch(
                "cannot merge columns of different shapes".to_string(),
            )),
        }
    }

    pub fn slice(&self, rows: Range<usize>) -> Self {
        match self {
            ColumnData::Fixed(column) => ColumnData::Fixed(column.slice(rows)),
            ColumnData::Symbol(column) => ColumnData::Symbol(column.slice(rows)),
            ColumnData::Var(column) => ColumnData::Var(column.slice(rows)),
        }
    }

    pub fn extend_from(&mut self, other: &Self) -> Result<(), Error> {
        match (self, other) {
            (ColumnData::Fixed(a), ColumnData::Fixed(b)) => a.extend_from(b),
            (ColumnData::Symbol(a), ColumnData::Symbol(b)) => a.extend_from(b),
            (ColumnData::Var(a), ColumnData::Var(b)) => a.extend_from(b),
            _ => Err(Error::SchemaMismatch(
                "cannot concatenate columns of different shapes".to_string(),
            )),
        }
    }
}

/// Persisted lengths of a column's files that belong to committed rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CommittedLen {
    pub data: u64,
    pub offsets: u64,
}

/// Codec adapter for one table column, selected from its type.
#[derive(Clone, Debug)]
pub(crate) struct ColumnCodec {
    index: usize,
    name: String,
    column_type: ColumnType,
    shape: ColumnShape,
}

impl ColumnCodec {
    pub fn for_table(metadata: &TableMetadata) -> Vec<ColumnCodec> {
        metadata
            .columns()
            .iter()
            .enumerate()
            .map(|(index, def)| ColumnCodec {
                index,
                name: def.name.clone(),
                column_type: def.column_type,
                shape: def.column_type.shape(),
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn empty(&self) -> ColumnData {
        match self.shape {
            ColumnShape::Fixed { width } => ColumnData::Fixed(FixedColumn::new(width)),
            ColumnShape::Symbol => ColumnData::Symbol(SymbolColumn::default()),
            ColumnShape::Var => ColumnData::Var(VarColumn::default()),
        }
    }

    pub fn from_arrow(
        &self,
        array: &ArrayRef,
        dictionary: &dyn SymbolDictionary,
    ) -> Result<ColumnData, Error> {
        Ok(match self.shape {
            ColumnShape::Fixed { .. } => {
                ColumnData::Fixed(FixedColumn::from_arrow(array, self.column_type)?)
            }
            ColumnShape::Symbol => {
                ColumnData::Symbol(SymbolColumn::from_arrow(array, self.index, dictionary)?)
            }
            ColumnShape::Var => ColumnData::Var(VarColumn::from_arrow(array, self.column_type)?),
        })
    }

    pub fn to_arrow(
        &self,
        data: &ColumnData,
        dictionary: &dyn SymbolDictionary,
        partition: &str,
    ) -> Result<ArrayRef, Error> {
        match data {
            ColumnData::Fixed(column) => column.to_arrow(self.column_type),
            ColumnData::Symbol(column) => column.to_arrow(self.index, dictionary, partition),
            ColumnData::Var(column) => column.to_arrow(self.column_type, partition),
        }
    }

    fn file(&self, dir: &str, kind: FileKind) -> ColumnFile {
        ColumnFile::new(dir, &self.name, kind)
    }

    /// Writes a complete column into fresh files.
    pub fn write(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        data: &ColumnData,
    ) -> Result<(), Error> {
        let file = self.file(dir, FileKind::Data);
        match data {
            ColumnData::Fixed(column) => storage.write(&file, column.bytes()),
            ColumnData::Symbol(column) => storage.write(&file, &column.encode()),
            ColumnData::Var(column) => {
                storage.write(&file, column.data())?;
                storage.write(&self.file(dir, FileKind::Offsets), &column.encode_offsets(0))
            }
        }
    }

    /// Reads the first `rows` rows, verifying the files can hold them.
    pub fn read(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        rows: usize,
        partition: &str,
    ) -> Result<ColumnData, Error> {
        match self.shape {
            ColumnShape::Fixed { width } => {
                let data = self.read_slots(storage, dir, rows, partition)?;
                Ok(ColumnData::Fixed(FixedColumn::from_bytes(width, data)))
            }
            ColumnShape::Symbol => {
                let data = self.read_slots(storage, dir, rows, partition)?;
                Ok(ColumnData::Symbol(SymbolColumn::decode(&data)))
            }
            ColumnShape::Var => {
                let (_, column) = self.read_var(storage, dir, rows, partition)?;
                Ok(ColumnData::Var(column))
            }
        }
    }

    /// Lengths covering the committed `rows`; fails with `CorruptPartition`
    /// when the files cannot hold the row count. Variable-length columns are
    /// decoded in full so a bad offset anywhere in the file is caught before
    /// an append writes past it.
    pub fn committed(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        rows: usize,
        partition: &str,
    ) -> Result<CommittedLen, Error> {
        let width = match self.shape {
            ColumnShape::Fixed { width } => width,
            ColumnShape::Symbol => 4,
            ColumnShape::Var => {
                return self
                    .read_var(storage, dir, rows, partition)
                    .map(|(committed, _)| committed);
            }
        };
        let data_file = self.file(dir, FileKind::Data);
        let expected = (rows * width) as u64;
        let actual = file_len(storage, &data_file, partition)?;
        check_len(&data_file, actual, expected, rows, partition)?;
        Ok(CommittedLen {
            data: expected,
            offsets: 0,
        })
    }

    fn read_slots(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        rows: usize,
        partition: &str,
    ) -> Result<Vec<u8>, Error> {
        let committed = self.committed(storage, dir, rows, partition)?;
        read_exact(storage, &self.file(dir, FileKind::Data), committed.data, partition)
    }

    fn read_var(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        rows: usize,
        partition: &str,
    ) -> Result<(CommittedLen, VarColumn), Error> {
        let offsets_file = self.file(dir, FileKind::Offsets);
        let expected = (rows * 8) as u64;
        let offsets_len = file_len(storage, &offsets_file, partition)?;
        check_len(&offsets_file, offsets_len, expected, rows, partition)?;
        let offsets = read_exact(storage, &offsets_file, expected, partition)?;

        let data_file = self.file(dir, FileKind::Data);
        let data_len = file_len(storage, &data_file, partition)?;
        let data = read_exact(storage, &data_file, data_len, partition)?;
        let column = VarColumn::decode(&offsets, data, partition, &self.name)?;
        let committed = CommittedLen {
            data: column.data().len() as u64,
            offsets: expected,
        };
        Ok((committed, column))
    }

    /// Drops any uncommitted tail and extends the files with `data`.
    pub fn append(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        committed: CommittedLen,
        data: &ColumnData,
    ) -> Result<(), Error> {
        self.rollback(storage, dir, committed)?;
        let data_file = self.file(dir, FileKind::Data);
        match data {
            ColumnData::Fixed(column) => storage.extend(&data_file, column.bytes()),
            ColumnData::Symbol(column) => storage.extend(&data_file, &column.encode()),
            ColumnData::Var(column) => {
                storage.extend(&data_file, column.data())?;
                storage.extend(
                    &self.file(dir, FileKind::Offsets),
                    &column.encode_offsets(committed.data as i64),
                )
            }
        }
    }

    /// Truncates the files back to their committed lengths.
    pub fn rollback(
        &self,
        storage: &dyn StorageBackend,
        dir: &str,
        committed: CommittedLen,
    ) -> Result<(), Error> {
        storage.truncate(&self.file(dir, FileKind::Data), committed.data)?;
        if self.shape == ColumnShape::Var {
            storage.truncate(&self.file(dir, FileKind::Offsets), committed.offsets)?;
        }
        Ok(())
    }
}

fn file_len(
    storage: &dyn StorageBackend,
    file: &ColumnFile,
    partition: &str,
) -> Result<u64, Error> {
    match storage.len(file) {
        Err(Error::IoFailure(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::corrupt(
            partition,
            format!("missing column file {}", file.file_name()),
        )),
        other => other,
    }
}

fn check_len(
    file: &ColumnFile,
    actual: u64,
    expected: u64,
    rows: usize,
    partition: &str,
) -> Result<(), Error> {
    if actual < expected {
        return Err(Error::corrupt(
            partition,
            format!(
                "{} holds {} bytes, row count {} needs {}",
                file.file_name(),
                actual,
                rows,
                expected
            ),
        ));
    }
    Ok(())
}

fn read_exact(
    storage: &dyn StorageBackend,
    file: &ColumnFile,
    len: u64,
    partition: &str,
) -> Result<Vec<u8>, Error> {
    let bytes = storage.read(file, 0, len)?;
    if (bytes.len() as u64) < len {
        return Err(Error::corrupt(
            partition,
            format!("{} shrank below its committed length", file.file_name()),
        ));
    }
    Ok(bytes)
}
