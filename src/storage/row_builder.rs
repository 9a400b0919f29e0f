//! Row-at-a-time construction of table batches.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Date64Builder, Float32Builder, Float64Builder,
    Int16Builder, Int32Builder, Int64Builder, Int8Builder, StringBuilder, StringDictionaryBuilder,
    TimestampNanosecondBuilder, UInt16Builder,
};
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;

use super::{ColumnType, Error, TableMetadata, TIMESTAMP_NULL};

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bin(Vec<u8>),
}

/// Builds a [`RecordBatch`] for a table one row at a time.
///
/// Columns a row does not set are null for that row; nothing carries over from
/// the previous row.
pub struct RowBatchBuilder {
    metadata: TableMetadata,
    rows: Vec<Vec<Value>>,
}

impl RowBatchBuilder {
    pub fn new(metadata: &TableMetadata) -> Self {
        Self {
            metadata: metadata.clone(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Starts a row at designated timestamp `ts`.
    pub fn new_row(&mut self, ts: i64) -> Result<Row<'_>, Error> {
        if ts == TIMESTAMP_NULL {
            return Err(Error::InvalidTimestamp("row timestamp is null".to_string()));
        }
        let mut values = vec![Value::Null; self.metadata.column_count()];
        values[self.metadata.timestamp_index()] = Value::Long(ts);
        Ok(Row {
            builder: self,
            values,
        })
    }

    /// Consumes the appended rows into a batch with the table's schema.
    pub fn finish(&mut self) -> Result<RecordBatch, Error> {
        let rows = std::mem::take(&mut self.rows);
        let columns = self
            .metadata
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, def)| build_column(def.column_type, rows.iter().map(|row| &row[idx])))
            .collect::<Vec<_>>();
        Ok(RecordBatch::try_new(Arc::clone(self.metadata.arrow_schema()), columns)?)
    }
}

/// A row being built; dropped without [`Row::append`] it is discarded.
pub struct Row<'a> {
    builder: &'a mut RowBatchBuilder,
    values: Vec<Value>,
}

impl Row<'_> {
    fn put(
        &mut self,
        column: usize,
        expected: &[ColumnType],
        value: Value,
    ) -> Result<&mut Self, Error> {
        let metadata = &self.builder.metadata;
        if column >= metadata.column_count() {
            return Err(Error::SchemaMismatch(format!(
                "column {} out of range for table '{}'",
                column,
                metadata.name()
            )));
        }
        if column == metadata.timestamp_index() {
            return Err(Error::InvalidTimestamp(
                "designated timestamp is set by new_row".to_string(),
            ));
        }
        let def = metadata.column(column);
        if !expected.contains(&def.column_type) {
            return Err(Error::SchemaMismatch(format!(
                "column '{}' is {:?}, cannot store {:?}",
                def.name, def.column_type, value
            )));
        }
        self.values[column] = value;
        Ok(self)
    }

    pub fn put_bool(&mut self, column: usize, value: bool) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Boolean], Value::Bool(value))
    }

    pub fn put_byte(&mut self, column: usize, value: i8) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Byte], Value::Byte(value))
    }

    pub fn put_short(&mut self, column: usize, value: i16) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Short], Value::Short(value))
    }

    /// Stores `value` as a single UTF-16 code unit; `'\0'` reads back as null.
    pub fn put_char(&mut self, column: usize, value: char) -> Result<&mut Self, Error> {
        let mut units = [0u16; 2];
        let unit = match value.encode_utf16(&mut units) {
            [unit] => *unit,
            _ => {
                return Err(Error::SchemaMismatch(format!(
                    "{:?} needs two UTF-16 code units, a char column holds one",
                    value
                )));
            }
        };
        self.put(column, &[ColumnType::Char], Value::Char(unit))
    }

    pub fn put_int(&mut self, column: usize, value: i32) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Int], Value::Int(value))
    }

    pub fn put_long(&mut self, column: usize, value: i64) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Long], Value::Long(value))
    }

    /// Milliseconds since the epoch.
    pub fn put_date(&mut self, column: usize, millis: i64) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Date], Value::Long(millis))
    }

    pub fn put_timestamp(&mut self, column: usize, nanos: i64) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Timestamp], Value::Long(nanos))
    }

    pub fn put_float(&mut self, column: usize, value: f32) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Float], Value::Float(value))
    }

    pub fn put_double(&mut self, column: usize, value: f64) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Double], Value::Double(value))
    }

    pub fn put_symbol(&mut self, column: usize, value: &str) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Symbol], Value::Str(value.to_string()))
    }

    pub fn put_str(&mut self, column: usize, value: &str) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::String], Value::Str(value.to_string()))
    }

    pub fn put_bin(&mut self, column: usize, value: &[u8]) -> Result<&mut Self, Error> {
        self.put(column, &[ColumnType::Binary], Value::Bin(value.to_vec()))
    }

    pub fn append(self) {
        self.builder.rows.push(self.values);
    }

    pub fn cancel(self) {}
}

macro_rules! build_primitive {
    ($builder:ty, $values:expr, $variant:ident) => {{
        let mut builder = <$builder>::new();
        for value in $values {
            match value {
                Value::$variant(v) => builder.append_value(*v),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish()) as ArrayRef
    }};
}

fn build_column<'v>(column_type: ColumnType, values: impl Iterator<Item = &'v Value>) -> ArrayRef {
    match column_type {
        ColumnType::Boolean => build_primitive!(BooleanBuilder, values, Bool),
        ColumnType::Byte => build_primitive!(Int8Builder, values, Byte),
        ColumnType::Short => build_primitive!(Int16Builder, values, Short),
        ColumnType::Char => build_primitive!(UInt16Builder, values, Char),
        ColumnType::Int => build_primitive!(Int32Builder, values, Int),
        ColumnType::Long => build_primitive!(Int64Builder, values, Long),
        ColumnType::Date => build_primitive!(Date64Builder, values, Long),
        ColumnType::Timestamp => build_primitive!(TimestampNanosecondBuilder, values, Long),
        ColumnType::Float => build_primitive!(Float32Builder, values, Float),
        ColumnType::Double => build_primitive!(Float64Builder, values, Double),
        ColumnType::Symbol => {
            let mut builder = StringDictionaryBuilder::<Int32Type>::new();
            for value in values {
                match value {
                    Value::Str(s) => builder.append_value(s),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::String => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Value::Str(s) => builder.append_value(s),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnType::Binary => {
            let mut builder = BinaryBuilder::new();
            for value in values {
                match value {
                    Value::Bin(b) => builder.append_value(b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}
