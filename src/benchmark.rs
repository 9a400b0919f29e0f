use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{DictionaryArray, Float64Array, TimestampNanosecondArray};
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tsqe_ooo::storage::{ColumnDef, ColumnType};
use tsqe_ooo::{Error, PartitionGranularity, StorageConfig, Table, TableMetadata};

const NUM_ROWS: usize = 200_000;
const TIME_RANGE_NS: i64 = 2 * 24 * 60 * 60 * 1_000_000_000; // 2 days in nanoseconds
const SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "GOOG", "AMZN"];

pub fn run_benchmarks() -> Result<(), Error> {
    println!("Running ingestion benchmarks with {} rows...", NUM_ROWS);

    let (timestamps, values, symbols) = generate_test_data();
    let mut sorted: Vec<usize> = (0..NUM_ROWS).collect();
    sorted.sort_by_key(|&i| timestamps[i]);

    println!("\nIngestion Results:");
    println!("------------------");
    for &batch_size in &[1_000, 10_000] {
        let in_order =
            benchmark_ingest("in-order", &sorted, batch_size, &timestamps, &values, &symbols)?;
        let shuffled: Vec<usize> = (0..NUM_ROWS).collect();
        let ooo = benchmark_ingest(
            "out-of-order",
            &shuffled,
            batch_size,
            &timestamps,
            &values,
            &symbols,
        )?;
        println!(
            "Batch size {}: OOO/in-order ratio {:.2}x",
            batch_size,
            ooo / in_order
        );
    }
    Ok(())
}

fn setup_table(label: &str, batch_size: usize) -> Result<(Table, PathBuf), Error> {
    let metadata = TableMetadata::new(
        "benchmark_ts",
        vec![
            ColumnDef::new("time", ColumnType::Timestamp),
            ColumnDef::new("sym", ColumnType::Symbol),
            ColumnDef::new("value", ColumnType::Double),
        ],
        0,
    )?;

    let root = std::env::temp_dir().join(format!(
        "tsqe-ooo-bench-{}-{}-{}",
        std::process::id(),
        label,
        batch_size
    ));
    let config = StorageConfig {
        // fine-grained so batches span many partitions
        partition_granularity: PartitionGranularity::Hour,
        fsync: false,
        ..StorageConfig::new(&root)
    };
    Ok((Table::create(metadata, config)?, root))
}

fn generate_test_data() -> (Vec<i64>, Vec<f64>, Vec<&'static str>) {
    let mut rng = StdRng::seed_from_u64(42);
    let mut timestamps = Vec::with_capacity(NUM_ROWS);
    let mut values = Vec::with_capacity(NUM_ROWS);
    let mut symbols = Vec::with_capacity(NUM_ROWS);

    for _ in 0..NUM_ROWS {
        timestamps.push(rng.random_range(0..TIME_RANGE_NS));
        values.push(rng.random::<f64>() * 100.0); // Random values 0-100
        symbols.push(SYMBOLS[rng.random_range(0..SYMBOLS.len())]);
    }

    (timestamps, values, symbols)
}

fn benchmark_ingest(
    label: &str,
    order: &[usize],
    batch_size: usize,
    timestamps: &[i64],
    values: &[f64],
    symbols: &[&str],
) -> Result<f64, Error> {
    let (table, root) = setup_table(label, batch_size)?;
    let start = Instant::now();

    let mut failed = 0;
    for chunk in order.chunks(batch_size) {
        let sym: DictionaryArray<Int32Type> = chunk.iter().map(|&i| symbols[i]).collect();
        let batch = RecordBatch::try_new(
            table.schema().clone(),
            vec![
                Arc::new(TimestampNanosecondArray::from_iter_values(
                    chunk.iter().map(|&i| timestamps[i]),
                )),
                Arc::new(sym),
                Arc::new(Float64Array::from_iter_values(chunk.iter().map(|&i| values[i]))),
            ],
        )?;
        failed += table.ingest(&batch)?.failed.len();
        table.purge_superseded();
    }

    let duration = start.elapsed().as_secs_f64() * 1000.0;
    let stats = table.stats();
    println!(
        "{} batch size {}: {:.2}ms ({} partitions, {} rows, {} appends, {} rewrites, {} failed)",
        label,
        batch_size,
        duration,
        table.partitions().len(),
        table.row_count(),
        stats.appends,
        stats.rewrites,
        failed
    );

    drop(table);
    std::fs::remove_dir_all(&root)?;
    Ok(duration)
}
