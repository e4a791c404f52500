use super::{EpisodeId, PlaylistEvent};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

/// Observer of committed playlist changes.
///
/// Callbacks run on the mutating thread after the store lock was released, so a
/// listener may query the coordinator but should re-read state instead of
/// trusting event order across threads.
pub trait PlaylistListener: Send + Sync {
    fn on_episode_added(&self, position: usize, episode_id: EpisodeId);
    fn on_episode_removed(&self, position: usize);
    fn on_episode_moved(&self, from: usize, to: usize);
}

/// Identity-based set of listeners (`Arc::ptr_eq`), notified synchronously.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn PlaylistListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if this exact listener was already registered.
    pub fn add(&self, listener: Arc<dyn PlaylistListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    pub fn remove(&self, listener: &Arc<dyn PlaylistListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan `event` out to a snapshot of the current listeners.
    /// A panicking listener is logged and skipped, the rest still run.
    pub fn notify(&self, event: PlaylistEvent) {
        if self.is_empty() {
            return;
        }

        let snapshot: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in snapshot {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| dispatch(&*listener, event)));
            if delivered.is_err() {
                warn!("Playlist listener panicked while handling {:?}", event);
            }
        }
    }
}

fn dispatch(listener: &dyn PlaylistListener, event: PlaylistEvent) {
    match event {
        PlaylistEvent::Added { position, episode_id } => listener.on_episode_added(position, episode_id),
        PlaylistEvent::Removed { position } => listener.on_episode_removed(position),
        PlaylistEvent::Moved { from, to } => listener.on_episode_moved(from, to),
    }
}

// Compare data pointers only; vtable pointers may differ across codegen units
fn same_listener(a: &Arc<dyn PlaylistListener>, b: &Arc<dyn PlaylistListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Forwards events into an unbounded channel for consumers that want
/// decoupled delivery (e.g. a UI task).
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<PlaylistEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PlaylistEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: PlaylistEvent) {
        // Receiver gone just means nobody is watching anymore
        let _ = self.tx.send(event);
    }
}

impl PlaylistListener for ChannelListener {
    fn on_episode_added(&self, position: usize, episode_id: EpisodeId) {
        self.forward(PlaylistEvent::Added { position, episode_id });
    }

    fn on_episode_removed(&self, position: usize) {
        self.forward(PlaylistEvent::Removed { position });
    }

    fn on_episode_moved(&self, from: usize, to: usize) {
        self.forward(PlaylistEvent::Moved { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PlaylistEvent>>,
    }

    impl PlaylistListener for Recorder {
        fn on_episode_added(&self, position: usize, episode_id: EpisodeId) {
            self.events.lock().unwrap().push(PlaylistEvent::Added { position, episode_id });
        }
        fn on_episode_removed(&self, position: usize) {
            self.events.lock().unwrap().push(PlaylistEvent::Removed { position });
        }
        fn on_episode_moved(&self, from: usize, to: usize) {
            self.events.lock().unwrap().push(PlaylistEvent::Moved { from, to });
        }
    }

    struct Panicker;

    impl PlaylistListener for Panicker {
        fn on_episode_added(&self, _: usize, _: EpisodeId) {
            panic!("listener bug");
        }
        fn on_episode_removed(&self, _: usize) {}
        fn on_episode_moved(&self, _: usize, _: usize) {}
    }

    #[test]
    fn test_add_is_identity_based() {
        let registry = ListenerRegistry::new();
        let first: Arc<dyn PlaylistListener> = Arc::new(Recorder::default());
        let second: Arc<dyn PlaylistListener> = Arc::new(Recorder::default());

        assert!(registry.add(first.clone()));
        assert!(!registry.add(first.clone()));
        assert!(registry.add(second.clone()));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(&first));
        assert!(!registry.remove(&first));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&second));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add(Arc::new(Panicker));
        registry.add(recorder.clone());

        let event = PlaylistEvent::Added { position: 0, episode_id: EpisodeId(5) };
        registry.notify(event);

        assert_eq!(*recorder.events.lock().unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_channel_listener_forwards_events() {
        let registry = ListenerRegistry::new();
        let (listener, mut rx) = ChannelListener::new();
        registry.add(listener);

        registry.notify(PlaylistEvent::Moved { from: 2, to: 0 });
        registry.notify(PlaylistEvent::Removed { position: 1 });

        assert_eq!(rx.recv().await, Some(PlaylistEvent::Moved { from: 2, to: 0 }));
        assert_eq!(rx.recv().await, Some(PlaylistEvent::Removed { position: 1 }));
    }
}
