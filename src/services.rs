// Process-wide wiring - build each core component once at startup
// and hand references to whoever needs them

use crate::config::Config;
use crate::download::{DownloadCallback, DownloadHandle, DownloadRequest, DownloadTracker, TransferBackend};
use crate::error::{DownloadError, StorageResult};
use crate::playlist::{EpisodeId, PlaylistCoordinator, PlaylistStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Services {
    pub playlist: Arc<PlaylistCoordinator>,
    pub downloads: Arc<DownloadTracker>,
}

impl Services {
    pub fn new(playlist: Arc<PlaylistCoordinator>, downloads: Arc<DownloadTracker>) -> Self {
        Self { playlist, downloads }
    }

    /// Open the playlist database from `config` and attach the platform backend.
    pub fn open(config: &Config, backend: Arc<dyn TransferBackend>) -> StorageResult<Self> {
        let store = Arc::new(PlaylistStore::open(&config.database_path)?);
        let playlist = Arc::new(PlaylistCoordinator::new(store));
        let downloads = Arc::new(DownloadTracker::from_config(backend, &config.downloads));
        Ok(Self::new(playlist, downloads))
    }

    /// Enqueue every playlist episode, in playlist order. A failed enqueue is
    /// reported in its slot and does not stop the rest.
    pub fn download_playlist<F>(
        &self,
        mut prepare: F,
    ) -> StorageResult<Vec<(EpisodeId, Result<DownloadHandle, DownloadError>)>>
    where
        F: FnMut(EpisodeId) -> (DownloadRequest, Arc<dyn DownloadCallback>),
    {
        let episodes = self.playlist.entities_in_order()?;
        let mut results = Vec::with_capacity(episodes.len());

        for episode_id in episodes {
            let (request, callback) = prepare(episode_id);
            let result = self.downloads.enqueue(request, callback);
            if let Err(e) = &result {
                warn!("Could not enqueue {} for download: {}", episode_id, e);
            }
            results.push((episode_id, result));
        }

        info!("Queued {} playlist episodes for download", results.len());
        Ok(results)
    }

    /// Cancel whatever is still downloading.
    pub fn shutdown(&self) -> usize {
        self.downloads.cancel_all()
    }
}
