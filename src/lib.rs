// PodPipe Library - core of the podcast client
// Playlist ordering + download tracking; UI and platform glue live elsewhere

pub mod config;   // settings and preferences
pub mod download; // in-flight transfers and their callbacks
pub mod error;    // storage / transfer error types
pub mod playlist; // ordered listening queue with change notification
pub mod services; // wires the components together at startup

// Export the stuff other modules actually use
pub use config::Config;
pub use download::{
    DownloadCallback, DownloadHandle, DownloadOwner, DownloadRequest, DownloadState,
    DownloadTracker, TransferBackend, TransferStatus,
};
pub use error::{DownloadError, StorageError, TransferFailed};
pub use playlist::{EpisodeId, PlaylistCoordinator, PlaylistEvent, PlaylistListener, PlaylistStore};
pub use services::Services;
