use std::sync::atomic::{AtomicU64, Ordering};

/// Assigns transaction numbers to partition state changes.
pub trait TxnLedger: Send + Sync {
    /// Reserves the next transaction number.
    fn begin(&self) -> u64;

    /// Records `txn` as published.
    fn commit(&self, txn: u64);

    fn last_committed(&self) -> u64;
}

/// In-process, monotonically increasing ledger.
#[derive(Debug, Default)]
pub struct SequenceLedger {
    next: AtomicU64,
    committed: AtomicU64,
}

impl SequenceLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TxnLedger for SequenceLedger {
    fn begin(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn commit(&self, txn: u64) {
        self.committed.fetch_max(txn, Ordering::SeqCst);
    }

    fn last_committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}
