use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("IO failure: {0}")]
    IoFailure(#[from] std::io::Error),
    #[error("Out of space: {0}")]
    OutOfSpace(String),
    #[error("Corrupt partition {partition}: {reason}")]
    CorruptPartition { partition: String, reason: String },
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),
    #[error("Stale plan: planned against txn {planned}, table is at txn {current}")]
    StalePlan { planned: u64, current: u64 },
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Maps storage-full conditions onto `OutOfSpace`, everything else onto `IoFailure`.
    pub fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Error::OutOfSpace(err.to_string())
        } else {
            Error::IoFailure(err)
        }
    }

    pub(crate) fn corrupt(partition: &str, reason: impl Into<String>) -> Self {
        Error::CorruptPartition {
            partition: partition.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before anything was mutated.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::SchemaMismatch(_) | Error::InvalidTimestamp(_) | Error::StalePlan { .. }
        )
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::OutOfSpace(err.to_string())
    }
}
