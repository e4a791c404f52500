// Download lifecycle - correlates platform transfer completions back to
// whoever asked for the download, firing exactly one terminal callback

pub mod backend; // the platform transfer subsystem we talk to
pub mod tracker; // handle -> callback bookkeeping

pub use backend::{TransferBackend, TransferStatus, TransferTicket};
pub use tracker::{spawn_completion_pump, DownloadTracker};

use crate::error::TransferFailed;
use crate::playlist::EpisodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque id the transfer subsystem hands out for an enqueued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadHandle(pub u64);

impl fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who a transfer belongs to; used for cancel-by-owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadOwner {
    Episode(EpisodeId),
    PodcastLogo(i64),
}

impl fmt::Display for DownloadOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOwner::Episode(id) => write!(f, "{}", id),
            DownloadOwner::PodcastLogo(id) => write!(f, "podcast#{} logo", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationVisibility {
    Hidden,
    #[default]
    Visible,
    VisibleNotifyCompleted,
}

/// Everything the transfer subsystem needs to know about one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source: String,
    /// Relative to the tracker's downloads root.
    pub destination: PathBuf,
    pub title: String,
    pub description: String,
    /// `None` falls back to the tracker's configured default.
    pub notification: Option<NotificationVisibility>,
    pub owner: DownloadOwner,
}

impl DownloadRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>, owner: DownloadOwner) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            title: String::new(),
            description: String::new(),
            notification: None,
            owner,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_notification(mut self, notification: NotificationVisibility) -> Self {
        self.notification = Some(notification);
        self
    }
}

/// Caller-side hooks. Exactly one of `on_cancel`, `on_error` or `on_finish`
/// fires per enqueued transfer, and never before `on_start` has returned.
/// `on_start` must not drive its own transfer to completion or cancel it.
pub trait DownloadCallback: Send + Sync {
    fn on_start(&self, path: &Path);
    fn on_cancel(&self);
    fn on_error(&self, failure: &TransferFailed);
    fn on_finish(&self, location: &Path);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Enqueued,
    Succeeded,
    Failed,
    Cancelled,
}
