use std::ops::Range;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, PrimitiveArray};
use arrow::datatypes::{
    ArrowPrimitiveType, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, TimestampNanosecondType, UInt16Type,
};
use arrow_array::cast::AsArray;

use super::RowSource;
use crate::storage::{ColumnType, Error};

/// Little-endian fixed-size value with a type-specific null representation.
pub(crate) trait FixedValue: Copy {
    const WIDTH: usize;
    const NULL: Self;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Self;

    fn is_null(self) -> bool;
}

macro_rules! int_fixed_value {
    ($ty:ty, $null:expr, $nullable:expr) => {
        impl FixedValue for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const NULL: Self = $null;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..Self::WIDTH]);
                <$ty>::from_le_bytes(buf)
            }

            // `$nullable` is false where the null value is also a legal value
            fn is_null(self) -> bool {
                $nullable && self == $null
            }
        }
    };
}

macro_rules! float_fixed_value {
    ($ty:ty) => {
        impl FixedValue for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const NULL: Self = <$ty>::NAN;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..Self::WIDTH]);
                <$ty>::from_le_bytes(buf)
            }

            fn is_null(self) -> bool {
                self.is_nan()
            }
        }
    };
}

int_fixed_value!(i8, 0, false);
int_fixed_value!(i16, 0, false);
int_fixed_value!(u16, 0, true);
int_fixed_value!(i32, i32::MIN, true);
int_fixed_value!(i64, i64::MIN, true);
float_fixed_value!(f32);
float_fixed_value!(f64);

/// Contiguous array of fixed-size slots, one per row.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FixedColumn {
    width: usize,
    bytes: Vec<u8>,
}

impl FixedColumn {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            bytes: Vec::new(),
        }
    }

    pub fn from_bytes(width: usize, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len() % width, 0);
        Self { width, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.width
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn slot(&self, row: usize) -> &[u8] {
        &self.bytes[row * self.width..(row + 1) * self.width]
    }

    pub fn value<T: FixedValue>(&self, row: usize) -> T {
        T::read_le(self.slot(row))
    }

    pub fn push<T: FixedValue>(&mut self, value: T) {
        debug_assert_eq!(T::WIDTH, self.width);
        value.write_le(&mut self.bytes);
    }

    /// Copies slots in merge order; index-based, no per-row type dispatch.
    pub fn gather(existing: &Self, batch: &Self, order: &[RowSource]) -> Result<Self, Error> {
        let width = existing.width;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(order.len() * width)?;
        for source in order {
            let slot = match *source {
                RowSource::Existing(row) => existing.slot(row as usize),
                RowSource::Batch(row) => batch.slot(row as usize),
            };
            bytes.extend_from_slice(slot);
        }
        Ok(Self { width, bytes })
    }

    pub fn slice(&self, rows: Range<usize>) -> Self {
        Self {
            width: self.width,
            bytes: self.bytes[rows.start * self.width..rows.end * self.width].to_vec(),
        }
    }

    pub fn extend_from(&mut self, other: &Self) -> Result<(), Error> {
        self.bytes.try_reserve(other.bytes.len())?;
        self.bytes.extend_from_slice(&other.bytes);
        Ok(())
    }

    pub fn as_i64s(&self) -> Vec<i64> {
        (0..self.len()).map(|row| self.value::<i64>(row)).collect()
    }

    pub fn from_i64s(values: &[i64]) -> Self {
        let mut column = Self::new(8);
        column.bytes.reserve(values.len() * 8);
        for value in values {
            column.push(*value);
        }
        column
    }

    pub fn from_arrow(array: &ArrayRef, column_type: ColumnType) -> Result<Self, Error> {
        let column = match column_type {
            ColumnType::Boolean => {
                let values = array.as_boolean();
                let mut column = Self::new(1);
                column.bytes.reserve(values.len());
                for value in values.iter() {
                    column.bytes.push(u8::from(value.unwrap_or(false)));
                }
                column
            }
            ColumnType::Byte => encode_primitive::<Int8Type>(array),
            ColumnType::Short => encode_primitive::<Int16Type>(array),
            ColumnType::Char => encode_primitive::<UInt16Type>(array),
            ColumnType::Int => encode_primitive::<Int32Type>(array),
            ColumnType::Long => encode_primitive::<Int64Type>(array),
            ColumnType::Date => encode_primitive::<Date64Type>(array),
            ColumnType::Timestamp => encode_primitive::<TimestampNanosecondType>(array),
            ColumnType::Float => encode_primitive::<Float32Type>(array),
            ColumnType::Double => encode_primitive::<Float64Type>(array),
            other => {
                return Err(Error::SchemaMismatch(format!(
                    "{:?} is not a fixed-width column type",
                    other
                )));
            }
        };
        Ok(column)
    }

    pub fn to_arrow(&self, column_type: ColumnType) -> Result<ArrayRef, Error> {
        let array: ArrayRef = match column_type {
            ColumnType::Boolean => Arc::new(BooleanArray::from(
                self.bytes.iter().map(|b| *b != 0).collect::<Vec<_>>(),
            )),
            ColumnType::Byte => Arc::new(decode_primitive::<Int8Type>(self)),
            ColumnType::Short => Arc::new(decode_primitive::<Int16Type>(self)),
            ColumnType::Char => Arc::new(decode_primitive::<UInt16Type>(self)),
            ColumnType::Int => Arc::new(decode_primitive::<Int32Type>(self)),
            ColumnType::Long => Arc::new(decode_primitive::<Int64Type>(self)),
            ColumnType::Date => Arc::new(decode_primitive::<Date64Type>(self)),
            ColumnType::Timestamp => Arc::new(decode_primitive::<TimestampNanosecondType>(self)),
            ColumnType::Float => Arc::new(decode_primitive::<Float32Type>(self)),
            ColumnType::Double => Arc::new(decode_primitive::<Float64Type>(self)),
            other => {
                return Err(Error::SchemaMismatch(format!(
                    "{:?} is not a fixed-width column type",
                    other
                )));
            }
        };
        Ok(array)
    }
}

/// Arrow nulls become the type's null representation.
fn encode_primitive<T>(array: &ArrayRef) -> FixedColumn
where
    T: ArrowPrimitiveType,
    T::Native: FixedValue,
{
    let values = array.as_primitive::<T>();
    let mut column = FixedColumn::new(T::Native::WIDTH);
    column.bytes.reserve(values.len() * T::Native::WIDTH);
    for value in values.iter() {
        value.unwrap_or(T::Native::NULL).write_le(&mut column.bytes);
    }
    column
}

fn decode_primitive<T>(column: &FixedColumn) -> PrimitiveArray<T>
where
    T: ArrowPrimitiveType,
    T::Native: FixedValue,
{
    column
        .bytes
        .chunks_exact(T::Native::WIDTH)
        .map(|slot| {
            let value = T::Native::read_le(slot);
            if value.is_null() { None } else { Some(value) }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int16Array, Int32Array, UInt16Array};

    #[test]
    fn nulls_map_to_sentinels() {
        let array: ArrayRef = Arc::new(Int32Array::from(vec![Some(7), None, Some(-3)]));
        let column = FixedColumn::from_arrow(&array, ColumnType::Int).unwrap();
        assert_eq!(column.len(), 3);
        assert_eq!(column.value::<i32>(1), i32::MIN);

        let back = column.to_arrow(ColumnType::Int).unwrap();
        let back = back.as_primitive::<Int32Type>();
        assert!(back.is_null(1));
        assert_eq!(back.value(2), -3);
    }

    #[test]
    fn short_null_reads_back_as_zero() {
        let array: ArrayRef = Arc::new(Int16Array::from(vec![None, Some(12)]));
        let column = FixedColumn::from_arrow(&array, ColumnType::Short).unwrap();
        let back = column.to_arrow(ColumnType::Short).unwrap();
        let back = back.as_primitive::<Int16Type>();
        assert_eq!(back.null_count(), 0);
        assert_eq!(back.value(0), 0);
    }

    #[test]
    fn char_zero_is_null() {
        let array: ArrayRef = Arc::new(UInt16Array::from(vec![Some(0x41), None, Some(0)]));
        let column = FixedColumn::from_arrow(&array, ColumnType::Char).unwrap();
        assert_eq!(column.bytes(), &[0x41, 0, 0, 0, 0, 0]);
        let back = column.to_arrow(ColumnType::Char).unwrap();
        let back = back.as_primitive::<UInt16Type>();
        assert_eq!(back.value(0), 0x41);
        assert!(back.is_null(1));
        assert!(back.is_null(2));
    }

    #[test]
    fn gather_interleaves_sources() {
        let existing = FixedColumn::from_i64s(&[10, 20, 30]);
        let batch = FixedColumn::from_i64s(&[15, 35]);
        let order = [
            RowSource::Existing(0),
            RowSource::Batch(0),
            RowSource::Existing(1),
            RowSource::Existing(2),
            RowSource::Batch(1),
        ];
        let merged = FixedColumn::gather(&existing, &batch, &order).unwrap();
        assert_eq!(merged.as_i64s(), vec![10, 15, 20, 30, 35]);
    }
}
