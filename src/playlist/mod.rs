// Playlist ordering engine - the user's listening queue
// Positions are always 0..n-1, every committed change is broadcast to listeners

pub mod coordinator; // insert/remove/move logic + notification
pub mod listener;    // observer registry and channel adapter
pub mod store;       // SQLite-backed (episode -> position) storage

pub use coordinator::{EpisodeChangeListener, PlaylistCoordinator};
pub use listener::{ChannelListener, ListenerRegistry, PlaylistListener};
pub use store::{PlaylistStore, PlaylistTransaction};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an episode owned by the episode store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeId(pub i64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "episode#{}", self.0)
    }
}

impl From<i64> for EpisodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub position: usize,
    pub episode_id: EpisodeId,
}

/// What changed in the playlist. Emitted only after the store committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistEvent {
    Added { position: usize, episode_id: EpisodeId },
    Removed { position: usize },
    Moved { from: usize, to: usize },
}
