//! Partition locator: binary searches over the ordered, disjoint partition list.

use std::ops::Range;

use super::version::PartitionVersionRef;

/// Partitions whose range intersects a batch, plus where the batch sits
/// relative to the whole table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Intersection {
    pub partitions: Range<usize>,
    pub before_first: bool,
    pub after_last: bool,
}

pub(crate) struct PartitionLocator<'a> {
    partitions: &'a [PartitionVersionRef],
}

impl<'a> PartitionLocator<'a> {
    pub fn new(partitions: &'a [PartitionVersionRef]) -> Self {
        Self { partitions }
    }

    pub fn intersecting(&self, min_ts: i64, max_ts: i64) -> Intersection {
        let start = self.partitions.partition_point(|p| p.max_ts < min_ts);
        let end = self.partitions.partition_point(|p| p.min_ts <= max_ts).max(start);
        Intersection {
            partitions: start..end,
            before_first: self.partitions.first().is_none_or(|p| min_ts < p.min_ts),
            after_last: self.partitions.last().is_none_or(|p| max_ts > p.max_ts),
        }
    }

    /// Indices of the partitions belonging to the time bucket starting at `bucket`.
    pub fn bucket_range(&self, bucket: i64) -> Range<usize> {
        let start = self.partitions.partition_point(|p| p.bucket < bucket);
        let end = self.partitions.partition_point(|p| p.bucket <= bucket);
        start..end
    }

    /// Partition owning `ts` within a non-empty bucket range: the first whose
    /// max is at or after `ts`, or the bucket's last partition.
    pub fn owner(&self, bucket: Range<usize>, ts: i64) -> usize {
        let candidates = &self.partitions[bucket.clone()];
        let offset = candidates.partition_point(|p| p.max_ts < ts);
        bucket.start + offset.min(candidates.len() - 1)
    }
}
