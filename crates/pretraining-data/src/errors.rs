use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read {}: {reason}", path.display())]
    SourceRead { path: PathBuf, reason: String },

    #[error("cleaning worker failed on batch {batch}: {reason}")]
    WorkerFailed { batch: usize, reason: String },

    #[error("invalid preprocessing config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("invalid character allow list: {0}")]
    Pattern(#[from] regex::Error),

    #[error("preprocessing cancelled after {batches} batches")]
    Cancelled { batches: usize },
}

impl DataError {
    /// Per-file and per-batch failures are logged and skipped; everything else
    /// aborts the run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DataError::SourceRead { .. } | DataError::WorkerFailed { .. } => true,
            DataError::Config(_)
            | DataError::Io(_)
            | DataError::Parquet(_)
            | DataError::Pattern(_)
            | DataError::Cancelled { .. } => false,
        }
    }

    pub(crate) fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DataError::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
