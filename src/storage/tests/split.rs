use super::*;
use rand::SeedableRng;

fn split_table() -> (Table, TempDir) {
    table_with_config(|cfg| cfg.max_partition_rows = Some(100))
}

#[test]
fn test_new_partition_split_by_size_policy() {
    let mut rng = StdRng::seed_from_u64(30);
    let (table, _root) = split_table();
    let batch = generate_batch(&mut rng, 250, 500_000 * SECOND, SECOND, true, false);

    let result = table.ingest(&batch).unwrap();
    assert_eq!(
        result.partitions_touched[0].strategy,
        MergeStrategy::Split { outputs: 3 }
    );
    assert_eq!(
        partition_names(&table),
        vec!["1970-01-06", "1970-01-06-1-1", "1970-01-06-1-2"]
    );
    let counts: Vec<usize> = table.partitions().iter().map(|p| p.row_count).collect();
    assert_eq!(counts, vec![84, 84, 82]);
    assert_table_eq(&table, &expected_union(&[batch]));
}

#[test]
fn test_merge_into_split_partitions_loses_no_rows() {
    let mut rng = StdRng::seed_from_u64(31);
    let (table, _root) = split_table();
    let existing = generate_batch(&mut rng, 250, 500_000 * SECOND, 2 * SECOND, false, false);
    table.ingest(&existing).unwrap();
    let before: usize = table.partitions().iter().map(|p| p.row_count).sum();

    // lands inside the middle partition only
    let middle = table.partitions()[1].clone();
    let timestamps: Vec<i64> = (0..60).map(|k| middle.min_ts + 1 + k * 2 * SECOND).collect();
    let batch = generate_batch_at(&mut rng, &timestamps, false);
    let result = table.ingest(&batch).unwrap();

    assert_eq!(
        result.partitions_touched[0].strategy,
        MergeStrategy::Split { outputs: 2 }
    );
    assert_eq!(table.row_count(), before + 60);
    assert_eq!(table.partitions().len(), 4);
    assert!(table.partitions().iter().all(|p| p.row_count <= 100));
    assert_table_eq(&table, &expected_union(&[existing, batch]));
}

#[test]
fn test_cuts_never_separate_equal_timestamps() {
    let mut rng = StdRng::seed_from_u64(32);
    let (table, _root) = split_table();
    let mut timestamps = vec![DAY + SECOND; 150];
    timestamps.extend([DAY + 2 * SECOND; 30]);
    let batch = generate_batch_at(&mut rng, &timestamps, false);

    table.ingest(&batch).unwrap();
    let counts: Vec<usize> = table.partitions().iter().map(|p| p.row_count).collect();
    assert_eq!(counts, vec![150, 30]);
    assert_table_eq(&table, &expected_union(&[batch]));
}

#[test]
fn test_collapse_adjacent_partitions() {
    let mut rng = StdRng::seed_from_u64(33);
    let (table, root) = split_table();
    let existing = generate_batch(&mut rng, 250, 500_000 * SECOND, SECOND, false, false);
    table.ingest(&existing).unwrap();
    let old_names = partition_names(&table);
    assert_eq!(old_names.len(), 3);

    // first and last partition of the bucket in one batch, no size policy
    let first = table.partitions()[0].min_ts;
    let last = table.partitions()[2].max_ts;
    let batch = generate_batch_at(&mut rng, &[first + 1, last + SECOND], false);
    {
        let mut writer = table.writer();
        writer.set_max_partition_rows(None);
        let plan = writer.plan_merge(&batch).unwrap();
        assert_eq!(
            plan.tasks()[0].strategy(),
            MergeStrategy::Collapse { sources: 3, outputs: 1 }
        );
        let result = writer.execute_plan(plan).unwrap();
        let outcome = &result.partitions_touched[0];
        assert_eq!(outcome.outputs, vec!["1970-01-06"]);
        assert_eq!(outcome.collapsed, old_names[1..].to_vec());
    }

    assert_eq!(partition_names(&table), vec!["1970-01-06"]);
    assert_eq!(table.row_count(), 252);
    let reader = table.reader();
    for name in &old_names[1..] {
        assert!(reader.partition_generation(name).is_none());
        assert!(matches!(reader.read_partition(name), Err(Error::InvalidPartition(_))));
    }
    drop(reader);

    assert_eq!(table.purge_superseded(), 3);
    assert_eq!(dirs_on_disk(root.path()), vec!["1970-01-06.2"]);
    assert_table_eq(&table, &expected_union(&[existing, batch]));
}
