// Playlist business logic on top of the ordering store
// Each operation = one store transaction, then listeners hear about it

use super::listener::{ListenerRegistry, PlaylistListener};
use super::store::{PlaylistStore, PlaylistTransaction};
use super::{EpisodeId, PlaylistEntry, PlaylistEvent};
use crate::error::StorageResult;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Callbacks the episode store emits. The coordinator only cares about deletes.
pub trait EpisodeChangeListener: Send + Sync {
    fn on_episode_added(&self, _episode_id: EpisodeId) {}
    fn on_episode_changed(&self, _episode_id: EpisodeId) {}
    fn on_episode_deleted(&self, episode_id: EpisodeId);
}

pub struct PlaylistCoordinator {
    store: Arc<PlaylistStore>,
    listeners: ListenerRegistry,
}

impl PlaylistCoordinator {
    pub fn new(store: Arc<PlaylistStore>) -> Self {
        Self {
            store,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn PlaylistListener>) {
        if !self.listeners.add(listener) {
            debug!("Playlist listener already registered");
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PlaylistListener>) {
        self.listeners.remove(listener);
    }

    /// Append at `next_free_position()`.
    pub fn append_end(&self, episode_id: EpisodeId) -> StorageResult<usize> {
        let position = self.store.transaction(|tx| {
            let position = tx.next_free_position()?;
            tx.insert(position, episode_id)?;
            Ok(position)
        })?;

        self.committed(PlaylistEvent::Added { position, episode_id });
        Ok(position)
    }

    /// Shift everything down by one and insert at position 0.
    pub fn prepend_start(&self, episode_id: EpisodeId) -> StorageResult<()> {
        self.store.transaction(|tx| {
            tx.shift_range(0, 1)?;
            tx.insert(0, episode_id)?;
            Ok(())
        })?;

        self.committed(PlaylistEvent::Added { position: 0, episode_id });
        Ok(())
    }

    /// Remove the entry at `position` and close the gap.
    /// `Ok(false)` when nothing was there; no event is sent in that case.
    pub fn remove_at(&self, position: usize) -> StorageResult<bool> {
        let removed = self.store.transaction(|tx| remove_position(tx, position))?;
        if removed {
            self.committed(PlaylistEvent::Removed { position });
        }
        Ok(removed)
    }

    /// Move the entry at `from` so that it ends up at `to`.
    ///
    /// `Ok(false)` if `from` holds nothing or `to` is past the last position.
    pub fn move_to(&self, from: usize, to: usize) -> StorageResult<bool> {
        let moved = self.store.transaction(|tx| {
            let Some((row_id, _)) = tx.row_at(from)? else {
                return Ok(false);
            };
            if to >= tx.count()? {
                return Ok(false);
            }

            // Moved row is taken out of the sequence then written back by id
            tx.shift_range(from, -1)?;
            tx.shift_range(to, 1)?;
            Ok(tx.set_position(row_id, to)? == 1)
        })?;

        if moved {
            self.committed(PlaylistEvent::Moved { from, to });
        }
        Ok(moved)
    }

    pub fn entities_in_order(&self) -> StorageResult<Vec<EpisodeId>> {
        Ok(self
            .store
            .all_entries()?
            .into_iter()
            .map(|entry| entry.episode_id)
            .collect())
    }

    pub fn entries(&self) -> StorageResult<Vec<PlaylistEntry>> {
        self.store.all_entries()
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.store.count()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_contiguous(&self) -> StorageResult<bool> {
        self.store.is_contiguous()
    }

    /// Remove every entry one by one from the front so listeners see one
    /// `Removed { position: 0 }` per entry, then wipe the table.
    ///
    /// Rows that show up while clearing (a listener appending, another
    /// thread) are swept by the final wipe and still get their event.
    pub fn clear(&self) -> StorageResult<usize> {
        let count = self.store.count()?;
        let mut removed = 0;
        for _ in 0..count {
            if self.remove_at(0)? {
                removed += 1;
            }
        }

        let leftovers = self.store.transaction(|tx| tx.delete_all())?;
        if leftovers > 0 {
            warn!("Clearing swept {} playlist rows added concurrently", leftovers);
            for _ in 0..leftovers {
                self.committed(PlaylistEvent::Removed { position: 0 });
            }
            removed += leftovers;
        }

        if removed > 0 {
            info!("Cleared playlist ({} entries)", removed);
        }
        Ok(removed)
    }

    /// Remove every occurrence of `episode_id`, highest position first so
    /// earlier removals never shift later targets. Returns how many went.
    pub fn remove_episode(&self, episode_id: EpisodeId) -> StorageResult<usize> {
        let removed = self.store.transaction(|tx| {
            let mut removed = Vec::new();
            for position in tx.positions_of(episode_id)?.into_iter().rev() {
                if remove_position(tx, position)? {
                    removed.push(position);
                }
            }
            Ok(removed)
        })?;

        for &position in &removed {
            self.committed(PlaylistEvent::Removed { position });
        }

        if !removed.is_empty() {
            info!("Removed {} from {} playlist position(s)", episode_id, removed.len());
        }
        Ok(removed.len())
    }

    /// Called by the episode store while it deletes `episode_id`, before its
    /// own delete returns, so the playlist never points at a missing episode.
    pub fn on_entity_deleted_externally(&self, episode_id: EpisodeId) -> StorageResult<usize> {
        debug!("{} deleted upstream, dropping it from the playlist", episode_id);
        self.remove_episode(episode_id)
    }

    fn committed(&self, event: PlaylistEvent) {
        debug_assert!(
            self.store.is_contiguous().unwrap_or(true),
            "playlist positions not contiguous after {:?}",
            event
        );
        debug!("Playlist change committed: {:?}", event);
        self.listeners.notify(event);
    }
}

impl EpisodeChangeListener for PlaylistCoordinator {
    fn on_episode_deleted(&self, episode_id: EpisodeId) {
        if let Err(e) = self.on_entity_deleted_externally(episode_id) {
            error!("Failed to drop deleted {} from playlist: {}", episode_id, e);
        }
    }
}

// Delete + close the gap behind it; shared by remove_at and the cascade
fn remove_position(tx: &PlaylistTransaction<'_>, position: usize) -> StorageResult<bool> {
    if tx.delete_at(position)? == 0 {
        return Ok(false);
    }
    tx.shift_range(position + 1, -1)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, OnceLock, Weak};
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PlaylistEvent>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<PlaylistEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
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
            panic!("added handler bug");
        }
        fn on_episode_removed(&self, _: usize) {
            panic!("removed handler bug");
        }
        fn on_episode_moved(&self, _: usize, _: usize) {
            panic!("moved handler bug");
        }
    }

    // Appends once, from inside the first removal it hears about
    #[derive(Default)]
    struct AppendOnRemove {
        coordinator: OnceLock<Weak<PlaylistCoordinator>>,
        fired: AtomicBool,
    }

    impl PlaylistListener for AppendOnRemove {
        fn on_episode_added(&self, _: usize, _: EpisodeId) {}
        fn on_episode_removed(&self, _: usize) {
            if self.fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) {
                coordinator.append_end(X).unwrap();
            }
        }
        fn on_episode_moved(&self, _: usize, _: usize) {}
    }

    const A: EpisodeId = EpisodeId(1);
    const B: EpisodeId = EpisodeId(2);
    const C: EpisodeId = EpisodeId(3);
    const D: EpisodeId = EpisodeId(4);
    const X: EpisodeId = EpisodeId(9);

    fn coordinator() -> (PlaylistCoordinator, Arc<Recorder>) {
        let store = Arc::new(PlaylistStore::open_in_memory().unwrap());
        let coordinator = PlaylistCoordinator::new(store);
        let recorder = Arc::new(Recorder::default());
        coordinator.add_listener(recorder.clone());
        (coordinator, recorder)
    }

    fn with_episodes(ids: &[EpisodeId]) -> (PlaylistCoordinator, Arc<Recorder>) {
        let (coordinator, recorder) = coordinator();
        for &id in ids {
            coordinator.append_end(id).unwrap();
        }
        recorder.take();
        (coordinator, recorder)
    }

    #[test]
    fn test_append_and_prepend() {
        let (coordinator, recorder) = coordinator();

        assert_eq!(coordinator.append_end(A).unwrap(), 0);
        assert_eq!(coordinator.append_end(B).unwrap(), 1);
        coordinator.prepend_start(C).unwrap();

        assert_eq!(coordinator.entities_in_order().unwrap(), vec![C, A, B]);
        assert!(coordinator.is_contiguous().unwrap());
        assert_eq!(
            recorder.take(),
            vec![
                PlaylistEvent::Added { position: 0, episode_id: A },
                PlaylistEvent::Added { position: 1, episode_id: B },
                PlaylistEvent::Added { position: 0, episode_id: C },
            ]
        );
    }

    #[test]
    fn test_remove_at_closes_gap() {
        let (coordinator, recorder) = with_episodes(&[A, B, C]);

        assert!(coordinator.remove_at(1).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![A, C]);
        assert!(coordinator.is_contiguous().unwrap());
        assert_eq!(recorder.take(), vec![PlaylistEvent::Removed { position: 1 }]);
    }

    #[test]
    fn test_remove_missing_position_is_silent() {
        let (coordinator, recorder) = with_episodes(&[A]);

        assert!(!coordinator.remove_at(5).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![A]);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_move_forward() {
        let (coordinator, recorder) = with_episodes(&[A, B, C, D]);

        assert!(coordinator.move_to(0, 2).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![B, C, A, D]);
        assert!(coordinator.is_contiguous().unwrap());
        assert_eq!(recorder.take(), vec![PlaylistEvent::Moved { from: 0, to: 2 }]);
    }

    #[test]
    fn test_move_backward_and_to_end() {
        let (coordinator, _) = with_episodes(&[A, B, C, D]);

        assert!(coordinator.move_to(3, 0).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![D, A, B, C]);

        assert!(coordinator.move_to(1, 3).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![D, B, C, A]);

        assert!(coordinator.move_to(2, 2).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![D, B, C, A]);
        assert!(coordinator.is_contiguous().unwrap());
    }

    #[test]
    fn test_move_rejects_bad_positions() {
        let (coordinator, recorder) = with_episodes(&[A, B]);

        assert!(!coordinator.move_to(4, 0).unwrap());
        assert!(!coordinator.move_to(0, 2).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![A, B]);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (coordinator, recorder) = with_episodes(&[A, B, C]);

        assert_eq!(coordinator.clear().unwrap(), 3);
        assert!(coordinator.entities_in_order().unwrap().is_empty());
        assert_eq!(recorder.take(), vec![PlaylistEvent::Removed { position: 0 }; 3]);

        assert_eq!(coordinator.clear().unwrap(), 0);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_clear_reports_rows_added_while_clearing() {
        let (coordinator, recorder) = with_episodes(&[A, B, C]);
        let coordinator = Arc::new(coordinator);
        let appender = Arc::new(AppendOnRemove::default());
        appender.coordinator.set(Arc::downgrade(&coordinator)).unwrap();
        coordinator.add_listener(appender);

        assert_eq!(coordinator.clear().unwrap(), 4);

        assert!(coordinator.entities_in_order().unwrap().is_empty());
        let events = recorder.take();
        let removed = events
            .iter()
            .filter(|e| matches!(e, PlaylistEvent::Removed { position: 0 }))
            .count();
        assert_eq!(removed, 4);
        assert_eq!(events.len(), 5);
        assert!(events.contains(&PlaylistEvent::Added { position: 2, episode_id: X }));
    }

    #[test]
    fn test_panicking_listener_does_not_undo_mutations() {
        let (coordinator, recorder) = with_episodes(&[A, B]);
        coordinator.add_listener(Arc::new(Panicker));

        assert_eq!(coordinator.append_end(C).unwrap(), 2);
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![A, B, C]);

        assert!(coordinator.remove_at(0).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![B, C]);

        assert!(coordinator.move_to(1, 0).unwrap());
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![C, B]);
        assert!(coordinator.is_contiguous().unwrap());

        // Listeners registered before the panicking one still hear everything
        assert_eq!(
            recorder.take(),
            vec![
                PlaylistEvent::Added { position: 2, episode_id: C },
                PlaylistEvent::Removed { position: 0 },
                PlaylistEvent::Moved { from: 1, to: 0 },
            ]
        );
    }

    #[test]
    fn test_external_delete_cascades() {
        let (coordinator, recorder) = with_episodes(&[A, X, B, X]);

        assert_eq!(coordinator.on_entity_deleted_externally(X).unwrap(), 2);
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![A, B]);
        assert!(coordinator.is_contiguous().unwrap());
        assert_eq!(
            recorder.take(),
            vec![
                PlaylistEvent::Removed { position: 3 },
                PlaylistEvent::Removed { position: 1 },
            ]
        );
    }

    #[test]
    fn test_episode_change_listener_only_reacts_to_deletes() {
        let (coordinator, recorder) = with_episodes(&[A, B, A]);
        let observer: &dyn EpisodeChangeListener = &coordinator;

        observer.on_episode_changed(A);
        observer.on_episode_added(C);
        assert!(recorder.take().is_empty());

        observer.on_episode_deleted(A);
        assert_eq!(coordinator.entities_in_order().unwrap(), vec![B]);
    }

    #[test]
    fn test_removed_listener_stops_receiving() {
        let (coordinator, recorder) = coordinator();
        let as_dyn: Arc<dyn PlaylistListener> = recorder.clone();

        coordinator.add_listener(as_dyn.clone());
        coordinator.append_end(A).unwrap();
        assert_eq!(recorder.take().len(), 1);

        coordinator.remove_listener(&as_dyn);
        coordinator.append_end(B).unwrap();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_mixed_sequence_stays_contiguous() {
        let (coordinator, _) = coordinator();
        let ops: [(u8, usize); 12] = [
            (0, 1), (0, 2), (1, 3), (0, 4), (2, 1), (3, 0),
            (1, 5), (2, 9), (3, 2), (0, 6), (2, 0), (3, 3),
        ];

        for (i, (op, arg)) in ops.iter().enumerate() {
            match op {
                0 => { coordinator.append_end(EpisodeId(i as i64)).unwrap(); }
                1 => { coordinator.prepend_start(EpisodeId(i as i64)).unwrap(); }
                2 => { coordinator.remove_at(*arg).unwrap(); }
                _ => {
                    let len = coordinator.len().unwrap();
                    if len > 0 {
                        coordinator.move_to(*arg % len, (arg + 1) % len).unwrap();
                    }
                }
            }
            assert!(coordinator.is_contiguous().unwrap(), "gap after op #{}", i);
        }
    }

    #[test]
    fn test_concurrent_appends_get_distinct_positions() {
        let (coordinator, recorder) = coordinator();
        let coordinator = Arc::new(coordinator);

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    for i in 0..10 {
                        coordinator.append_end(EpisodeId(worker * 100 + i)).unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(coordinator.len().unwrap(), 40);
        assert!(coordinator.is_contiguous().unwrap());
        assert_eq!(recorder.take().len(), 40);
    }
}
