pub mod split;

use std::io;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date64Array, DictionaryArray, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, StringArray, TimestampNanosecondArray,
    UInt16Array, UInt32Array,
};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use arrow_ord::sort::{lexsort_to_indices, SortColumn};
use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tempfile::{tempdir, TempDir};

use super::*;

pub const SECOND: i64 = 1_000_000_000;
pub const DAY: i64 = 86_400 * SECOND;
/// Index of the designated timestamp in [`ooo_metadata`].
pub const TS: usize = 12;

const SYMBOLS: [&str; 3] = ["msft", "ibm", "googl"];

/// Wide table covering every column shape.
pub fn ooo_metadata() -> TableMetadata {
    TableMetadata::new(
        "x",
        vec![
            ColumnDef::new("i", ColumnType::Int),
            ColumnDef::new("sym", ColumnType::Symbol),
            ColumnDef::new("amt", ColumnType::Double),
            ColumnDef::new("timestamp", ColumnType::Timestamp),
            ColumnDef::new("b", ColumnType::Boolean),
            ColumnDef::new("c", ColumnType::String),
            ColumnDef::new("d", ColumnType::Double),
            ColumnDef::new("e", ColumnType::Float),
            ColumnDef::new("f", ColumnType::Short),
            ColumnDef::new("g", ColumnType::Date),
            ColumnDef::new("ik", ColumnType::Symbol),
            ColumnDef::new("j", ColumnType::Long),
            ColumnDef::new("ts", ColumnType::Timestamp),
            ColumnDef::new("l", ColumnType::Byte),
            ColumnDef::new("m", ColumnType::Binary),
            ColumnDef::new("n", ColumnType::String),
            ColumnDef::new("t", ColumnType::Char),
        ],
        TS,
    )
    .unwrap()
}

pub fn test_config(root: &TempDir) -> StorageConfig {
    StorageConfig {
        fsync: false,
        ..StorageConfig::new(root.path())
    }
}

pub fn test_table() -> (Table, TempDir) {
    let root = tempdir().unwrap();
    let table = Table::create(ooo_metadata(), test_config(&root)).unwrap();
    (table, root)
}

pub fn table_with_config(config: impl FnOnce(&mut StorageConfig)) -> (Table, TempDir) {
    let root = tempdir().unwrap();
    let mut cfg = test_config(&root);
    config(&mut cfg);
    let table = Table::create(ooo_metadata(), cfg).unwrap();
    (table, root)
}

pub fn failing_table() -> (Table, Arc<FailingStorage>, TempDir) {
    let root = tempdir().unwrap();
    let storage = Arc::new(FailingStorage::new(FsStorage::new(root.path(), false).unwrap()));
    let table = Table::with_collaborators(
        ooo_metadata(),
        test_config(&root),
        storage.clone(),
        Arc::new(SymbolTable::new()),
        Arc::new(SequenceLedger::new()),
    );
    (table, storage, root)
}

/// `count` rows with timestamps `start, start + step, ...`, optionally shuffled.
pub fn generate_batch(
    rng: &mut StdRng,
    count: usize,
    start: i64,
    step: i64,
    shuffle: bool,
    null_binary: bool,
) -> RecordBatch {
    let mut timestamps: Vec<i64> = (0..count as i64).map(|k| start + k * step).collect();
    if shuffle {
        timestamps.shuffle(rng);
    }
    generate_batch_at(rng, &timestamps, null_binary)
}

pub fn generate_batch_at(rng: &mut StdRng, timestamps: &[i64], null_binary: bool) -> RecordBatch {
    let count = timestamps.len();

    let mut i = Vec::with_capacity(count);
    let mut sym = Vec::with_capacity(count);
    let mut amt = Vec::with_capacity(count);
    let mut timestamp = Vec::with_capacity(count);
    let mut b = Vec::with_capacity(count);
    let mut c = Vec::with_capacity(count);
    let mut d = Vec::with_capacity(count);
    let mut e = Vec::with_capacity(count);
    let mut f = Vec::with_capacity(count);
    let mut g = Vec::with_capacity(count);
    let mut ik = Vec::with_capacity(count);
    let mut j = Vec::with_capacity(count);
    let mut l = Vec::with_capacity(count);
    let mut m: Vec<Option<Vec<u8>>> = Vec::with_capacity(count);
    let mut n = Vec::with_capacity(count);
    let mut t = Vec::with_capacity(count);

    for _ in 0..count {
        i.push(some(rng).then(|| rng.random_range(-1000..1000)));
        sym.push(some(rng).then(|| SYMBOLS[rng.random_range(0..SYMBOLS.len())]));
        amt.push(some(rng).then(|| rng.random::<f64>() * 100.0));
        timestamp.push(some(rng).then(|| rng.random_range(0..1_600_000_000_000_000_000i64)));
        b.push(rng.random::<bool>());
        c.push(some(rng).then(|| random_string(rng)));
        d.push(some(rng).then(|| rng.random::<f64>()));
        e.push(some(rng).then(|| rng.random::<f32>()));
        f.push(rng.random::<i16>());
        g.push(some(rng).then(|| rng.random_range(0..1_600_000_000_000i64)));
        ik.push(some(rng).then(|| SYMBOLS[rng.random_range(0..SYMBOLS.len())]));
        j.push(some(rng).then(|| rng.random_range(-1_000_000i64..1_000_000)));
        l.push(rng.random::<i8>());
        m.push((!null_binary && some(rng)).then(|| {
            let len = rng.random_range(0..16);
            (0..len).map(|_| rng.random::<u8>()).collect()
        }));
        n.push(some(rng).then(|| random_string(rng)));
        t.push(some(rng).then(|| rng.random_range(u16::from(b'A')..=u16::from(b'z'))));
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(i)),
        Arc::new(sym.into_iter().collect::<DictionaryArray<Int32Type>>()),
        Arc::new(Float64Array::from(amt)),
        Arc::new(TimestampNanosecondArray::from(timestamp)),
        Arc::new(BooleanArray::from(b)),
        Arc::new(StringArray::from(c)),
        Arc::new(Float64Array::from(d)),
        Arc::new(Float32Array::from(e)),
        Arc::new(Int16Array::from(f)),
        Arc::new(Date64Array::from(g)),
        Arc::new(ik.into_iter().collect::<DictionaryArray<Int32Type>>()),
        Arc::new(Int64Array::from(j)),
        Arc::new(TimestampNanosecondArray::from(timestamps.to_vec())),
        Arc::new(Int8Array::from(l)),
        Arc::new(BinaryArray::from_iter(m)),
        Arc::new(StringArray::from(n)),
        Arc::new(UInt16Array::from(t)),
    ];
    RecordBatch::try_new(Arc::clone(ooo_metadata().arrow_schema()), columns).unwrap()
}

/// Nine in ten values are set.
fn some(rng: &mut StdRng) -> bool {
    rng.random_range(0..10) != 0
}

fn random_string(rng: &mut StdRng) -> String {
    let len = rng.random_range(0..8);
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// `union all` of the batches in ingest order, stable-sorted by timestamp.
pub fn expected_union(batches: &[RecordBatch]) -> RecordBatch {
    let all = concat_batches(ooo_metadata().arrow_schema(), batches).unwrap();
    let arrival: ArrayRef = Arc::new(UInt32Array::from_iter_values(0..all.num_rows() as u32));
    let indices = lexsort_to_indices(
        &[
            SortColumn {
                values: Arc::clone(all.column(TS)),
                options: None,
            },
            SortColumn {
                values: arrival,
                options: None,
            },
        ],
        None,
    )
    .unwrap();
    let columns = all
        .columns()
        .iter()
        .map(|column| take(column.as_ref(), &indices, None).unwrap())
        .collect();
    RecordBatch::try_new(all.schema(), columns).unwrap()
}

pub fn pretty(batch: &RecordBatch) -> String {
    pretty_format_batches(&[batch.clone()]).unwrap().to_string()
}

/// Asserts the table reads back as `expected` and its partitions are well formed.
pub fn assert_table_eq(table: &Table, expected: &RecordBatch) {
    let reader = table.reader();
    assert!(reader.snapshot().is_ordered(), "partition list out of order");
    for partition in reader.snapshot().partitions() {
        let batch = reader.read_partition(&partition.name).unwrap();
        let ts = timestamps(&batch);
        assert_eq!(ts.len(), partition.row_count);
        assert!(ts.windows(2).all(|w| w[0] <= w[1]), "{} not sorted", partition.name);
        assert_eq!(ts.first(), Some(&partition.min_ts));
        assert_eq!(ts.last(), Some(&partition.max_ts));
    }
    let actual = reader.read_all().unwrap();
    assert_eq!(actual.num_rows(), expected.num_rows());
    assert_eq!(pretty(&actual), pretty(expected));
}

pub fn timestamps(batch: &RecordBatch) -> Vec<i64> {
    batch
        .column(TS)
        .as_any()
        .downcast_ref::<TimestampNanosecondArray>()
        .unwrap()
        .values()
        .to_vec()
}

pub fn partition_names(table: &Table) -> Vec<String> {
    table.partitions().iter().map(|p| p.name.clone()).collect()
}

struct FailRule {
    dir_prefix: String,
    remaining: usize,
    kind: io::ErrorKind,
}

/// Storage that fails writes into matching directories after a number of
/// successful ones, and can misreport the length of one file.
pub struct FailingStorage {
    inner: FsStorage,
    rule: Mutex<Option<FailRule>>,
    inflated: Mutex<Option<(ColumnFile, u64)>>,
}

impl FailingStorage {
    pub fn new(inner: FsStorage) -> Self {
        Self {
            inner,
            rule: Mutex::new(None),
            inflated: Mutex::new(None),
        }
    }

    /// Reports `len` for `dir/<column>.d` until healed.
    pub fn inflate_len(&self, dir: &str, column: &str, len: u64) {
        *self.inflated.lock() = Some((ColumnFile::new(dir, column, FileKind::Data), len));
    }

    pub fn fail_writes(&self, dir_prefix: &str, after: usize, kind: io::ErrorKind) {
        *self.rule.lock() = Some(FailRule {
            dir_prefix: dir_prefix.to_string(),
            remaining: after,
            kind,
        });
    }

    pub fn heal(&self) {
        *self.rule.lock() = None;
        *self.inflated.lock() = None;
    }

    pub fn root(&self) -> &std::path::Path {
        self.inner.root()
    }

    fn check(&self, dir: &str) -> Result<(), Error> {
        let mut rule = self.rule.lock();
        match rule.as_mut() {
            Some(rule) if dir.starts_with(&rule.dir_prefix) => {
                if rule.remaining == 0 {
                    return Err(Error::from_io(io::Error::new(rule.kind, "injected failure")));
                }
                rule.remaining -= 1;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl StorageBackend for FailingStorage {
    fn create_dir(&self, dir: &str) -> Result<(), Error> {
        self.inner.create_dir(dir)
    }

    fn remove_dir(&self, dir: &str) -> Result<(), Error> {
        self.inner.remove_dir(dir)
    }

    fn write(&self, file: &ColumnFile, bytes: &[u8]) -> Result<(), Error> {
        self.check(&file.dir)?;
        self.inner.write(file, bytes)
    }

    fn extend(&self, file: &ColumnFile, bytes: &[u8]) -> Result<(), Error> {
        self.check(&file.dir)?;
        self.inner.extend(file, bytes)
    }

    fn truncate(&self, file: &ColumnFile, len: u64) -> Result<(), Error> {
        self.inner.truncate(file, len)
    }

    fn read(&self, file: &ColumnFile, offset: u64, len: u64) -> Result<Vec<u8>, Error> {
        self.inner.read(file, offset, len)
    }

    fn len(&self, file: &ColumnFile) -> Result<u64, Error> {
        match &*self.inflated.lock() {
            Some((inflated, len)) if inflated == file => Ok(*len),
            _ => self.inner.len(file),
        }
    }
}

/// Directory names currently present under a table root.
pub fn dirs_on_disk(root: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
