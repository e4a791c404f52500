use super::{EpisodeId, PlaylistEntry};
use crate::error::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Durable (episode -> position) storage.
///
/// Every mutation goes through [`PlaylistStore::transaction`], which holds the
/// connection lock for the whole unit of work. A shift and the insert/delete that
/// goes with it therefore commit together or not at all.
pub struct PlaylistStore {
    conn: Mutex<Connection>,
}

impl PlaylistStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> StorageResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::Location {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        debug!("Opened playlist database at {}", db_path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> StorageResult<()> {
        let conn = self.lock();

        // No UNIQUE on position: shifts pass through duplicate values mid-transaction
        conn.execute(
            "CREATE TABLE IF NOT EXISTS playlist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_playlist_position ON playlist(position)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_playlist_episode ON playlist(episode_id)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic inside a closure already rolled its transaction back on unwind
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` as one atomic unit. Returning `Err` from the closure (or any
    /// statement failing inside it) rolls everything back.
    pub fn transaction<T, F>(&self, work: F) -> StorageResult<T>
    where
        F: FnOnce(&PlaylistTransaction<'_>) -> StorageResult<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let unit = PlaylistTransaction { tx };
        let value = work(&unit)?;
        unit.tx.commit()?;
        Ok(value)
    }

    pub fn next_free_position(&self) -> StorageResult<usize> {
        self.transaction(|tx| tx.next_free_position())
    }

    pub fn entry_at(&self, position: usize) -> StorageResult<Option<EpisodeId>> {
        self.transaction(|tx| tx.entry_at(position))
    }

    pub fn all_entries(&self) -> StorageResult<Vec<PlaylistEntry>> {
        self.transaction(|tx| tx.all_entries())
    }

    pub fn positions_of(&self, episode_id: EpisodeId) -> StorageResult<BTreeSet<usize>> {
        self.transaction(|tx| tx.positions_of(episode_id))
    }

    pub fn count(&self) -> StorageResult<usize> {
        self.transaction(|tx| tx.count())
    }

    pub fn is_contiguous(&self) -> StorageResult<bool> {
        self.transaction(|tx| tx.is_contiguous())
    }
}

/// Position arithmetic available inside a store transaction.
pub struct PlaylistTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl PlaylistTransaction<'_> {
    /// `max(position) + 1`, or 0 for an empty playlist.
    pub fn next_free_position(&self) -> StorageResult<usize> {
        let next: i64 = self.tx.query_row(
            "SELECT IFNULL(MAX(position), -1) + 1 FROM playlist",
            [],
            |row| row.get(0),
        )?;
        Ok(to_position(next)?)
    }

    /// Add `delta` to every position >= `from`. Returns the number of rows moved.
    pub fn shift_range(&self, from: usize, delta: i64) -> StorageResult<usize> {
        let shifted = self.tx.execute(
            "UPDATE playlist SET position = position + ?1 WHERE position >= ?2",
            params![delta, from as i64],
        )?;
        Ok(shifted)
    }

    /// Insert a row and return its internal id.
    pub fn insert(&self, position: usize, episode_id: EpisodeId) -> StorageResult<i64> {
        self.tx.execute(
            "INSERT INTO playlist (episode_id, position) VALUES (?1, ?2)",
            params![episode_id.0, position as i64],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Internal row id and episode at `position`.
    pub fn row_at(&self, position: usize) -> StorageResult<Option<(i64, EpisodeId)>> {
        let row = self
            .tx
            .query_row(
                "SELECT id, episode_id FROM playlist WHERE position = ?1",
                params![position as i64],
                |row| Ok((row.get::<_, i64>(0)?, EpisodeId(row.get(1)?))),
            )
            .optional()?;
        Ok(row)
    }

    pub fn entry_at(&self, position: usize) -> StorageResult<Option<EpisodeId>> {
        Ok(self.row_at(position)?.map(|(_, episode_id)| episode_id))
    }

    pub fn set_position(&self, row_id: i64, position: usize) -> StorageResult<usize> {
        let updated = self.tx.execute(
            "UPDATE playlist SET position = ?1 WHERE id = ?2",
            params![position as i64, row_id],
        )?;
        Ok(updated)
    }

    /// Delete the row at `position`. Returns 0 or 1.
    pub fn delete_at(&self, position: usize) -> StorageResult<usize> {
        let removed = self.tx.execute(
            "DELETE FROM playlist WHERE position = ?1",
            params![position as i64],
        )?;
        Ok(removed)
    }

    pub fn delete_all(&self) -> StorageResult<usize> {
        Ok(self.tx.execute("DELETE FROM playlist", [])?)
    }

    pub fn count(&self) -> StorageResult<usize> {
        let count: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM playlist", [], |row| row.get(0))?;
        Ok(to_position(count)?)
    }

    pub fn positions_of(&self, episode_id: EpisodeId) -> StorageResult<BTreeSet<usize>> {
        let mut stmt = self
            .tx
            .prepare("SELECT position FROM playlist WHERE episode_id = ?1")?;

        let positions = stmt
            .query_map(params![episode_id.0], |row| to_position(row.get(0)?))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(positions)
    }

    pub fn all_entries(&self) -> StorageResult<Vec<PlaylistEntry>> {
        let mut stmt = self
            .tx
            .prepare("SELECT position, episode_id FROM playlist ORDER BY position ASC")?;

        let entries = stmt
            .query_map([], |row| {
                Ok(PlaylistEntry {
                    position: to_position(row.get(0)?)?,
                    episode_id: EpisodeId(row.get(1)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// True when the occupied positions are exactly 0..n-1 with no doubles.
    pub fn is_contiguous(&self) -> StorageResult<bool> {
        let entries = self.all_entries()?;
        Ok(entries
            .iter()
            .enumerate()
            .all(|(expected, entry)| entry.position == expected))
    }
}

fn to_position(raw: i64) -> rusqlite::Result<usize> {
    usize::try_from(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
    })
}
