//! Table-global symbol dictionary mapping symbol strings to stable integer codes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Error;

/// Code stored for a null symbol.
pub const SYMBOL_NULL: i32 = -1;

/// Dictionary consulted by symbol columns. Codes are append-only: once
/// assigned, a code never changes meaning.
pub trait SymbolDictionary: Send + Sync {
    fn resolve_or_intern(&self, column: usize, value: &str) -> Result<i32, Error>;

    fn resolve(&self, column: usize, code: i32) -> Option<Arc<str>>;

    fn symbol_count(&self, column: usize) -> usize;
}

#[derive(Default)]
struct ColumnSymbols {
    codes: HashMap<Arc<str>, i32>,
    values: Vec<Arc<str>>,
}

/// In-process dictionary; reads share a lock, interning is serialized.
#[derive(Default)]
pub struct SymbolTable {
    columns: RwLock<HashMap<usize, ColumnSymbols>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SymbolDictionary for SymbolTable {
    fn resolve_or_intern(&self, column: usize, value: &str) -> Result<i32, Error> {
        if let Some(code) = self
            .columns
            .read()
            .get(&column)
            .and_then(|symbols| symbols.codes.get(value))
        {
            return Ok(*code);
        }

        let mut columns = self.columns.write();
        let symbols = columns.entry(column).or_default();
        // another writer may have interned it between the two locks
        if let Some(code) = symbols.codes.get(value) {
            return Ok(*code);
        }

        let code = i32::try_from(symbols.values.len()).map_err(|_| {
            Error::OutOfSpace(format!("symbol column {} exhausted its code space", column))
        })?;
        let value: Arc<str> = Arc::from(value);
        symbols.values.push(Arc::clone(&value));
        symbols.codes.insert(value, code);
        Ok(code)
    }

    fn resolve(&self, column: usize, code: i32) -> Option<Arc<str>> {
        if code < 0 {
            return None;
        }
        self.columns
            .read()
            .get(&column)
            .and_then(|symbols| symbols.values.get(code as usize))
            .cloned()
    }

    fn symbol_count(&self, column: usize) -> usize {
        self.columns
            .read()
            .get(&column)
            .map_or(0, |symbols| symbols.values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_column() {
        let table = SymbolTable::new();
        let msft = table.resolve_or_intern(1, "msft").unwrap();
        let ibm = table.resolve_or_intern(1, "ibm").unwrap();
        assert_eq!(table.resolve_or_intern(1, "msft").unwrap(), msft);
        assert_ne!(msft, ibm);

        // independent code space per column
        assert_eq!(table.resolve_or_intern(2, "ibm").unwrap(), 0);
        assert_eq!(table.resolve(1, ibm).as_deref(), Some("ibm"));
        assert_eq!(table.resolve(1, SYMBOL_NULL), None);
        assert_eq!(table.symbol_count(1), 2);
        assert_eq!(table.symbol_count(7), 0);
    }
}
