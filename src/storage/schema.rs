//! Table schema catalog: column types, their persisted shape and the arrow
//! schema incoming batches must match.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

use super::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Byte,
    Short,
    /// One UTF-16 code unit; code unit 0 is null.
    Char,
    Int,
    Long,
    Date,
    Timestamp,
    Float,
    Double,
    Symbol,
    String,
    Binary,
}

/// Persisted layout of a column store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnShape {
    Fixed { width: usize },
    Symbol,
    Var,
}

impl ColumnType {
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Byte => DataType::Int8,
            ColumnType::Short => DataType::Int16,
            ColumnType::Char => DataType::UInt16,
            ColumnType::Int => DataType::Int32,
            ColumnType::Long => DataType::Int64,
            ColumnType::Date => DataType::Date64,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Nanosecond, None),
            ColumnType::Float => DataType::Float32,
            ColumnType::Double => DataType::Float64,
            ColumnType::Symbol => {
                DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
            }
            ColumnType::String => DataType::Utf8,
            ColumnType::Binary => DataType::Binary,
        }
    }

    pub fn shape(&self) -> ColumnShape {
        match self {
            ColumnType::Boolean | ColumnType::Byte => ColumnShape::Fixed { width: 1 },
            ColumnType::Short | ColumnType::Char => ColumnShape::Fixed { width: 2 },
            ColumnType::Int | ColumnType::Float => ColumnShape::Fixed { width: 4 },
            ColumnType::Long | ColumnType::Date | ColumnType::Timestamp | ColumnType::Double => {
                ColumnShape::Fixed { width: 8 }
            }
            ColumnType::Symbol => ColumnShape::Symbol,
            ColumnType::String | ColumnType::Binary => ColumnShape::Var,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TableMetadata {
    name: String,
    columns: Vec<ColumnDef>,
    timestamp_index: usize,
    schema: SchemaRef,
}

impl TableMetadata {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
        timestamp_index: usize,
    ) -> Result<Self, Error> {
        let name = name.into();
        match columns.get(timestamp_index) {
            Some(def) if def.column_type == ColumnType::Timestamp => {}
            Some(def) => {
                return Err(Error::SchemaMismatch(format!(
                    "designated timestamp column '{}' is {:?}, expected Timestamp",
                    def.name, def.column_type
                )));
            }
            None => {
                return Err(Error::SchemaMismatch(format!(
                    "timestamp index {} out of range for {} columns",
                    timestamp_index,
                    columns.len()
                )));
            }
        }

        let mut seen = HashSet::new();
        for def in &columns {
            if !seen.insert(def.name.as_str()) {
                return Err(Error::SchemaMismatch(format!("duplicate column '{}'", def.name)));
            }
        }

        let fields: Vec<Field> = columns
            .iter()
            .enumerate()
            .map(|(idx, def)| {
                Field::new(&def.name, def.column_type.arrow_type(), idx != timestamp_index)
            })
            .collect();

        Ok(Self {
            name,
            columns,
            timestamp_index,
            schema: Arc::new(Schema::new(fields)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &ColumnDef {
        &self.columns[idx]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn timestamp_index(&self) -> usize {
        self.timestamp_index
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|def| def.name == name)
    }

    pub fn arrow_schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Checks a batch schema field-for-field; nullability is not compared.
    pub fn validate_batch_schema(&self, schema: &Schema) -> Result<(), Error> {
        let fields = schema.fields();
        if fields.len() != self.columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "batch has {} columns, table '{}' has {}",
                fields.len(),
                self.name,
                self.columns.len()
            )));
        }

        for (field, def) in fields.iter().zip(&self.columns) {
            if field.name() != &def.name {
                return Err(Error::SchemaMismatch(format!(
                    "expected column '{}', batch has '{}'",
                    def.name,
                    field.name()
                )));
            }
            let expected = def.column_type.arrow_type();
            if field.data_type() != &expected {
                return Err(Error::SchemaMismatch(format!(
                    "column '{}' expected {:?}, batch has {:?}",
                    def.name,
                    expected,
                    field.data_type()
                )));
            }
        }

        Ok(())
    }
}
