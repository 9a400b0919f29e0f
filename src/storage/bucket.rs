//! Time bucket arithmetic: partition keys, natural boundaries and names.

use chrono::{DateTime, Datelike, Months, NaiveDate, Timelike, Utc};

use super::{Error, PartitionGranularity};

const NANOS_PER_MINUTE: i64 = 60 * 1_000_000_000;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Start of the bucket containing `ts`.
pub(crate) fn bucket_start(ts: i64, granularity: PartitionGranularity) -> Result<i64, Error> {
    match granularity {
        PartitionGranularity::Minute => floor_to(ts, NANOS_PER_MINUTE),
        PartitionGranularity::Hour => floor_to(ts, NANOS_PER_HOUR),
        PartitionGranularity::Day => floor_to(ts, NANOS_PER_DAY),
        PartitionGranularity::Month => {
            let dt = DateTime::from_timestamp_nanos(ts);
            calendar_nanos(NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1))
                .ok_or_else(|| no_bucket(ts))
        }
        PartitionGranularity::Year => {
            let dt = DateTime::from_timestamp_nanos(ts);
            calendar_nanos(NaiveDate::from_ymd_opt(dt.year(), 1, 1)).ok_or_else(|| no_bucket(ts))
        }
    }
}

/// Natural boundary following the bucket that starts at `start`, or `None`
/// when that bucket runs to the end of the timestamp range.
pub(crate) fn next_bucket_start(start: i64, granularity: PartitionGranularity) -> Option<i64> {
    let months = match granularity {
        PartitionGranularity::Minute => return start.checked_add(NANOS_PER_MINUTE),
        PartitionGranularity::Hour => return start.checked_add(NANOS_PER_HOUR),
        PartitionGranularity::Day => return start.checked_add(NANOS_PER_DAY),
        PartitionGranularity::Month => Months::new(1),
        PartitionGranularity::Year => Months::new(12),
    };
    let date = DateTime::from_timestamp_nanos(start).date_naive();
    calendar_nanos(date.checked_add_months(months))
}

/// Partition key rendered from a bucket start, safe to use as a directory name.
pub(crate) fn bucket_name(start: i64, granularity: PartitionGranularity) -> String {
    let dt = DateTime::<Utc>::from_timestamp_nanos(start);
    match granularity {
        PartitionGranularity::Minute => format!(
            "{}-{:02}-{:02}T{:02}{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute()
        ),
        PartitionGranularity::Hour => {
            format!("{}-{:02}-{:02}T{:02}", dt.year(), dt.month(), dt.day(), dt.hour())
        }
        PartitionGranularity::Day => format!("{}-{:02}-{:02}", dt.year(), dt.month(), dt.day()),
        PartitionGranularity::Month => format!("{}-{:02}", dt.year(), dt.month()),
        PartitionGranularity::Year => dt.year().to_string(),
    }
}

fn floor_to(ts: i64, size: i64) -> Result<i64, Error> {
    ts.div_euclid(size)
        .checked_mul(size)
        .ok_or_else(|| no_bucket(ts))
}

fn calendar_nanos(date: Option<NaiveDate>) -> Option<i64> {
    date.and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
}

fn no_bucket(ts: i64) -> Error {
    Error::InvalidTimestamp(format!("no bucket start for {} in the timestamp range", ts))
}
