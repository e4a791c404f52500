// Error types shared by the playlist engine and the download tracker
// "Not found" is never an error here - those paths return bool/Option

use std::path::PathBuf;

use crate::download::DownloadHandle;

/// The ordering store failed to read or write. The operation was aborted and
/// the transaction rolled back, so positions are unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("playlist database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to prepare database location {path}: {source}")]
    Location {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised synchronously by `DownloadTracker::enqueue`.
/// None of them leave a tracked handle behind.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download storage unavailable: {0}")]
    TransferUnavailable(PathBuf),

    #[error("transfer subsystem rejected the request: {0}")]
    Rejected(String),

    #[error("failed to create destination for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal negative outcome of a transfer, handed to `DownloadCallback::on_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("download {handle} failed: {reason}")]
pub struct TransferFailed {
    pub handle: DownloadHandle,
    pub reason: String,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
