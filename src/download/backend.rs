use super::{DownloadHandle, NotificationVisibility};
use std::path::{Path, PathBuf};

/// Fully resolved transfer request as handed to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTicket<'a> {
    pub source: &'a str,
    pub destination: &'a Path,
    pub title: &'a str,
    pub description: &'a str,
    pub notification: NotificationVisibility,
    pub user_agent: &'a str,
}

/// Final state of a transfer as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Succeeded { location: PathBuf },
    Failed { reason: String },
    /// Still running, or the platform no longer knows the handle.
    Unknown,
}

/// The platform download subsystem. Transport, retries and the actual byte
/// moving all live behind this trait.
///
/// A handle must stay unique for as long as the transfer it names is live;
/// a handle handed out again before its completion was reported is refused.
/// `enqueue` may report completion from another thread before it returns.
pub trait TransferBackend: Send + Sync {
    fn enqueue(&self, ticket: &TransferTicket<'_>) -> anyhow::Result<DownloadHandle>;

    /// Best effort stop; the tracker never waits for it.
    fn remove(&self, handle: DownloadHandle);

    fn status(&self, handle: DownloadHandle) -> TransferStatus;
}
