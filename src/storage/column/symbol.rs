use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringDictionaryBuilder};
use arrow::datatypes::Int32Type;
use arrow_array::cast::AsArray;

use super::RowSource;
use crate::storage::symbol_table::{SymbolDictionary, SYMBOL_NULL};
use crate::storage::Error;

/// Per-row symbol codes resolved against the table dictionary.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SymbolColumn {
    codes: Vec<i32>,
}

impl SymbolColumn {
    #[cfg(test)]
    pub fn from_codes(codes: Vec<i32>) -> Self {
        Self { codes }
    }

    #[cfg(test)]
    pub fn codes(&self) -> &[i32] {
        &self.codes
    }

    pub fn gather(existing: &Self, batch: &Self, order: &[RowSource]) -> Result<Self, Error> {
        let mut codes = Vec::new();
        codes.try_reserve_exact(order.len())?;
        for source in order {
            codes.push(match *source {
                RowSource::Existing(row) => existing.codes[row as usize],
                RowSource::Batch(row) => batch.codes[row as usize],
            });
        }
        Ok(Self { codes })
    }

    pub fn slice(&self, rows: Range<usize>) -> Self {
        Self {
            codes: self.codes[rows].to_vec(),
        }
    }

    pub fn extend_from(&mut self, other: &Self) -> Result<(), Error> {
        self.codes.try_reserve(other.codes.len())?;
        self.codes.extend_from_slice(&other.codes);
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.codes.len() * 4);
        for code in &self.codes {
            bytes.extend_from_slice(&code.to_le_bytes());
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let codes = bytes
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self { codes }
    }

    /// Interns every distinct value of the batch's dictionary once.
    pub fn from_arrow(
        array: &ArrayRef,
        column: usize,
        dictionary: &dyn SymbolDictionary,
    ) -> Result<Self, Error> {
        let dict_array = array.as_dictionary::<Int32Type>();
        let values = dict_array.values().as_string::<i32>();
        let mut interned: Vec<Option<i32>> = vec![None; values.len()];

        let mut codes = Vec::with_capacity(dict_array.len());
        for key in dict_array.keys().iter() {
            let code = match key {
                Some(key) if values.is_valid(key as usize) => {
                    let key = key as usize;
                    match interned[key] {
                        Some(code) => code,
                        None => {
                            let code = dictionary.resolve_or_intern(column, values.value(key))?;
                            interned[key] = Some(code);
                            code
                        }
                    }
                }
                _ => SYMBOL_NULL,
            };
            codes.push(code);
        }
        Ok(Self { codes })
    }

    pub fn to_arrow(
        &self,
        column: usize,
        dictionary: &dyn SymbolDictionary,
        partition: &str,
    ) -> Result<ArrayRef, Error> {
        let mut builder = StringDictionaryBuilder::<Int32Type>::new();
        let mut resolved: HashMap<i32, Arc<str>> = HashMap::new();
        for &code in &self.codes {
            if code == SYMBOL_NULL {
                builder.append_null();
                continue;
            }
            let value = match resolved.get(&code) {
                Some(value) => Arc::clone(value),
                None => {
                    let value = dictionary.resolve(column, code).ok_or_else(|| {
                        Error::corrupt(
                            partition,
                            format!("unknown symbol code {} in column {}", code, column),
                        )
                    })?;
                    resolved.insert(code, Arc::clone(&value));
                    value
                }
            };
            builder.append_value(value.as_ref());
        }
        Ok(Arc::new(builder.finish()))
    }
}
