use super::backend::{TransferBackend, TransferStatus, TransferTicket};
use super::{
    DownloadCallback, DownloadHandle, DownloadOwner, DownloadRequest, DownloadState,
    NotificationVisibility,
};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, TransferFailed};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct TrackedDownload {
    seq: u64, // enqueue order, decides which match cancel() picks
    request: DownloadRequest,
    callback: Arc<dyn DownloadCallback>,
    path: PathBuf,
    enqueued_at: DateTime<Utc>,
    started: bool, // on_start has returned; terminal paths wait for it
}

#[derive(Default)]
struct ActiveDownloads {
    next_seq: u64,
    downloads: HashMap<DownloadHandle, TrackedDownload>,
}

/// Keeps track of every in-flight download and routes the platform's
/// completion events back to the right callback.
///
/// A handle is removed from the map *before* its terminal callback runs, so
/// duplicate or late completion events find nothing and are dropped.
///
/// Completion and cancellation of a transfer block until its `on_start` has
/// returned. `on_start` must therefore not complete or cancel its own
/// transfer on the calling thread.
pub struct DownloadTracker {
    backend: Arc<dyn TransferBackend>,
    root: PathBuf,
    user_agent: String,
    notification: NotificationVisibility,
    active: Mutex<ActiveDownloads>,
    started: Condvar,
}

impl DownloadTracker {
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        root: impl Into<PathBuf>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            root: root.into(),
            user_agent: user_agent.into(),
            notification: NotificationVisibility::default(),
            active: Mutex::new(ActiveDownloads::default()),
            started: Condvar::new(),
        }
    }

    pub fn from_config(backend: Arc<dyn TransferBackend>, config: &DownloadConfig) -> Self {
        Self {
            notification: config.notification,
            ..Self::new(backend, config.root.clone(), config.user_agent.clone())
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActiveDownloads> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the map once no entry selected by `waiting_on` is still starting.
    fn lock_settled<F>(&self, waiting_on: F) -> MutexGuard<'_, ActiveDownloads>
    where
        F: Fn(&DownloadHandle, &TrackedDownload) -> bool,
    {
        let mut active = self.lock();
        while active
            .downloads
            .iter()
            .any(|(handle, download)| !download.started && waiting_on(handle, download))
        {
            active = self
                .started
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        active
    }

    fn mark_started(&self, handle: DownloadHandle) {
        if let Some(download) = self.lock().downloads.get_mut(&handle) {
            download.started = true;
        }
        self.started.notify_all();
    }

    /// Hand a transfer to the platform and start tracking it.
    ///
    /// Fails fast with `TransferUnavailable` when the downloads root is not a
    /// writable directory; nothing is tracked in that case.
    pub fn enqueue(
        &self,
        request: DownloadRequest,
        callback: Arc<dyn DownloadCallback>,
    ) -> Result<DownloadHandle, DownloadError> {
        self.ensure_writable()?;

        if !is_contained(&request.destination) {
            return Err(DownloadError::Rejected(format!(
                "destination {} escapes the downloads root",
                request.destination.display()
            )));
        }

        let path = self.root.join(&request.destination);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let ticket = TransferTicket {
            source: &request.source,
            destination: &path,
            title: &request.title,
            description: &request.description,
            notification: request.notification.unwrap_or(self.notification),
            user_agent: &self.user_agent,
        };

        // Hold the map while the platform allocates the handle so a very fast
        // completion cannot arrive before the mapping exists
        let handle = {
            let mut active = self.lock();
            let handle = self
                .backend
                .enqueue(&ticket)
                .map_err(|e| DownloadError::Rejected(format!("{:#}", e)))?;

            if active.downloads.contains_key(&handle) {
                // Removing it would stop the transfer that owns the live mapping
                warn!(
                    "Transfer subsystem reused live handle {} for {}; new transfer is untracked",
                    handle,
                    path.display()
                );
                return Err(DownloadError::Rejected(format!(
                    "transfer subsystem reused live handle {}",
                    handle
                )));
            }

            let seq = active.next_seq;
            active.next_seq += 1;
            active.downloads.insert(
                handle,
                TrackedDownload {
                    seq,
                    request,
                    callback: Arc::clone(&callback),
                    path: path.clone(),
                    enqueued_at: Utc::now(),
                    started: false,
                },
            );
            handle
        };

        // Terminal paths for this handle are parked until the guard drops,
        // which also happens if on_start panics
        let _started = StartedGuard { tracker: self, handle };
        callback.on_start(&path);
        debug!("Enqueued download {} -> {}", handle, path.display());
        Ok(handle)
    }

    fn ensure_writable(&self) -> Result<(), DownloadError> {
        if let Err(e) = write_check(&self.root) {
            warn!("Download root {} is not writable: {}", self.root.display(), e);
            return Err(DownloadError::TransferUnavailable(self.root.clone()));
        }
        Ok(())
    }

    /// Cancel the earliest-enqueued transfer owned by `owner`.
    /// Only one transfer goes per call; see `cancel_all_for` for the rest.
    pub fn cancel(&self, owner: &DownloadOwner) -> bool {
        let cancelled = {
            let mut active = self.lock_settled(|_, download| download.request.owner == *owner);
            let first = active
                .downloads
                .iter()
                .filter(|(_, download)| download.request.owner == *owner)
                .min_by_key(|(_, download)| download.seq)
                .map(|(handle, _)| *handle);

            first.and_then(|handle| active.downloads.remove(&handle).map(|d| (handle, d)))
        };

        match cancelled {
            Some((handle, download)) => {
                self.finish_cancel(handle, download);
                true
            }
            None => false,
        }
    }

    /// Cancel every transfer owned by `owner`, oldest first.
    pub fn cancel_all_for(&self, owner: &DownloadOwner) -> usize {
        let cancelled = {
            let mut active = self.lock_settled(|_, download| download.request.owner == *owner);
            let handles: Vec<_> = active
                .downloads
                .iter()
                .filter(|(_, download)| download.request.owner == *owner)
                .map(|(handle, _)| *handle)
                .collect();
            drain_ordered(&mut active, handles)
        };

        let count = cancelled.len();
        for (handle, download) in cancelled {
            self.finish_cancel(handle, download);
        }
        count
    }

    /// Cancel everything that is still in flight. Call on shutdown.
    pub fn cancel_all(&self) -> usize {
        let cancelled = {
            let mut active = self.lock_settled(|_, _| true);
            let handles: Vec<_> = active.downloads.keys().copied().collect();
            drain_ordered(&mut active, handles)
        };

        let count = cancelled.len();
        for (handle, download) in cancelled {
            self.finish_cancel(handle, download);
        }
        if count > 0 {
            info!("Cancelled {} active downloads", count);
        }
        count
    }

    // Mapping is already gone at this point
    fn finish_cancel(&self, handle: DownloadHandle, download: TrackedDownload) {
        self.backend.remove(handle);
        info!("Cancelled download {} for {}", handle, download.request.owner);
        download.callback.on_cancel();
    }

    /// The platform reports that `handle` finished.
    ///
    /// Returns the terminal state that was delivered, or `None` when the handle
    /// is not tracked (already finished, cancelled, or never ours).
    pub fn completion(&self, handle: DownloadHandle) -> Option<DownloadState> {
        let removed = self
            .lock_settled(|tracked, _| *tracked == handle)
            .downloads
            .remove(&handle);
        let Some(download) = removed else {
            debug!("Ignoring completion for untracked download {}", handle);
            return None;
        };

        let elapsed = (Utc::now() - download.enqueued_at).num_seconds();

        match self.backend.status(handle) {
            TransferStatus::Succeeded { location } => {
                info!(
                    "Download {} finished after {}s: {}",
                    handle,
                    elapsed,
                    location.display()
                );
                download.callback.on_finish(&location);
                Some(DownloadState::Succeeded)
            }
            TransferStatus::Failed { reason } => {
                warn!("Download {} did not complete successfully (reason: {})", handle, reason);
                download.callback.on_error(&TransferFailed { handle, reason });
                Some(DownloadState::Failed)
            }
            TransferStatus::Unknown => {
                warn!(
                    "Download {} for {} has no determinable outcome",
                    handle,
                    download.path.display()
                );
                download.callback.on_error(&TransferFailed {
                    handle,
                    reason: "transfer status unavailable".to_string(),
                });
                Some(DownloadState::Failed)
            }
        }
    }

    pub fn is_tracked(&self, handle: DownloadHandle) -> bool {
        self.lock().downloads.contains_key(&handle)
    }

    pub fn active_count(&self) -> usize {
        self.lock().downloads.len()
    }

    /// Tracked handles, oldest first.
    pub fn active_handles(&self) -> Vec<DownloadHandle> {
        let active = self.lock();
        let mut handles: Vec<_> = active
            .downloads
            .iter()
            .map(|(handle, download)| (download.seq, *handle))
            .collect();
        handles.sort_unstable();
        handles.into_iter().map(|(_, handle)| handle).collect()
    }
}

struct StartedGuard<'a> {
    tracker: &'a DownloadTracker,
    handle: DownloadHandle,
}

impl Drop for StartedGuard<'_> {
    fn drop(&mut self) {
        self.tracker.mark_started(self.handle);
    }
}

// Actually write into `root`; permission bits alone say nothing about ownership
fn write_check(root: &Path) -> io::Result<()> {
    if !fs::metadata(root)?.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
    }

    let marker = root.join(format!(".podpipe-write-check-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker)?;

    // A concurrent enqueue may already have removed it
    match fs::remove_file(&marker) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn drain_ordered(
    active: &mut ActiveDownloads,
    handles: Vec<DownloadHandle>,
) -> Vec<(DownloadHandle, TrackedDownload)> {
    let mut drained: Vec<_> = handles
        .into_iter()
        .filter_map(|handle| active.downloads.remove(&handle).map(|d| (handle, d)))
        .collect();
    drained.sort_by_key(|(_, download)| download.seq);
    drained
}

fn is_contained(destination: &Path) -> bool {
    destination
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && destination.file_name().is_some()
}

/// Feed completion events from the platform into `tracker` on a tokio task.
/// The task ends when every sender is dropped and yields how many terminal
/// callbacks it delivered.
pub fn spawn_completion_pump(
    tracker: Arc<DownloadTracker>,
    mut completions: mpsc::UnboundedReceiver<DownloadHandle>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(handle) = completions.recv().await {
            if tracker.completion(handle).is_some() {
                delivered += 1;
            }
        }
        debug!("Completion pump stopped after {} deliveries", delivered);
        delivered
    })
}
