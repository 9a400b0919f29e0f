//! Copy-on-write partition list and the publisher that swaps it.
//!
//! Every publish builds a complete new [`PartitionList`] and replaces the
//! shared `Arc` in one step. Readers holding the previous list keep seeing a
//! fully valid table; nothing reachable from a published list is ever mutated.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::files::StorageBackend;
use super::logging::storage_log;
use super::version::{DataDir, PartitionVersionRef};
use super::Error;

/// Ordered, disjoint partitions of a table as of one transaction.
#[derive(Clone, Debug, Default)]
pub struct PartitionList {
    txn: u64,
    partitions: Vec<PartitionVersionRef>,
}

impl PartitionList {
    #[cfg(test)]
    pub(crate) fn from_parts(txn: u64, partitions: Vec<PartitionVersionRef>) -> Self {
        Self { txn, partitions }
    }

    /// Transaction of the last publish ("latest committed" pointer).
    pub fn txn(&self) -> u64 {
        self.txn
    }

    pub fn partitions(&self) -> &[PartitionVersionRef] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PartitionVersionRef> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn min_timestamp(&self) -> Option<i64> {
        self.partitions.first().map(|p| p.min_ts)
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        self.partitions.last().map(|p| p.max_ts)
    }

    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(|p| p.row_count).sum()
    }

    /// True when partition ranges are non-empty, disjoint and increasing.
    pub fn is_ordered(&self) -> bool {
        self.partitions.iter().all(|p| p.row_count > 0 && p.min_ts <= p.max_ts)
            && self
                .partitions
                .windows(2)
                .all(|pair| pair[0].max_ts < pair[1].min_ts && pair[0].bucket <= pair[1].bucket)
    }

    /// New list with `sources` replaced by `outputs`. Sources must be the
    /// exact versions currently listed and contiguous; with no sources the
    /// outputs are inserted at their timestamp position.
    fn replace(
        &self,
        txn: u64,
        sources: &[PartitionVersionRef],
        outputs: Vec<PartitionVersionRef>,
    ) -> Result<PartitionList, Error> {
        let mut partitions = Vec::with_capacity(self.partitions.len() + outputs.len());
        match sources.first() {
            Some(first) => {
                let start = self
                    .partitions
                    .iter()
                    .position(|p| Arc::ptr_eq(p, first))
                    .ok_or(Error::StalePlan {
                        planned: first.generation,
                        current: self.txn,
                    })?;
                let end = start + sources.len();
                let contiguous = end <= self.partitions.len()
                    && self.partitions[start..end]
                        .iter()
                        .zip(sources)
                        .all(|(listed, source)| Arc::ptr_eq(listed, source));
                if !contiguous {
                    return Err(Error::StalePlan {
                        planned: first.generation,
                        current: self.txn,
                    });
                }
                partitions.extend_from_slice(&self.partitions[..start]);
                partitions.extend(outputs);
                partitions.extend_from_slice(&self.partitions[end..]);
            }
            None => {
                let at = outputs.first().map_or(self.partitions.len(), |out| {
                    self.partitions.partition_point(|p| p.max_ts < out.min_ts)
                });
                partitions.extend_from_slice(&self.partitions[..at]);
                partitions.extend(outputs);
                partitions.extend_from_slice(&self.partitions[at..]);
            }
        }
        Ok(PartitionList { txn, partitions })
    }
}

/// Owns the table's current partition list.
#[derive(Default)]
pub(crate) struct Publisher {
    current: RwLock<Arc<PartitionList>>,
    superseded: Mutex<Vec<Arc<DataDir>>>,
}

impl Publisher {
    pub fn snapshot(&self) -> Arc<PartitionList> {
        Arc::clone(&self.current.read())
    }

    /// Swaps in a list where `sources` are replaced by `outputs`.
    pub fn publish(
        &self,
        txn: u64,
        sources: &[PartitionVersionRef],
        outputs: Vec<PartitionVersionRef>,
    ) -> Result<Arc<PartitionList>, Error> {
        let retired: Vec<Arc<DataDir>> = sources
            .iter()
            .filter(|source| {
                !outputs
                    .iter()
                    .any(|out| Arc::ptr_eq(&out.data_dir, &source.data_dir))
            })
            .map(|source| Arc::clone(&source.data_dir))
            .collect();

        let next = {
            let mut current = self.current.write();
            let next = Arc::new(current.replace(txn, sources, outputs)?);
            *current = Arc::clone(&next);
            next
        };
        self.superseded.lock().extend(retired);
        Ok(next)
    }

    /// Deletes superseded directories no reader can reach any more.
    pub fn purge(&self, storage: &dyn StorageBackend) -> usize {
        let mut superseded = self.superseded.lock();
        let mut removed = 0;
        superseded.retain(|dir| {
            if Arc::strong_count(dir) > 1 {
                return true;
            }
            match storage.remove_dir(&dir.name) {
                Ok(()) => {
                    removed += 1;
                    false
                }
                Err(e) => {
                    storage_log!(log::Level::Warn, "purge_failed", "dir={} error={}", dir.name, e);
                    true
                }
            }
        });
        removed
    }

    pub fn pending_purge(&self) -> usize {
        self.superseded.lock().len()
    }
}
