//! Database handles and the in-memory stores that back them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, DatabaseName};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How a file-backed database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Normal locking; other processes may open the same file.
    Shared,
    /// The connection keeps the file lock for its whole lifetime.
    Exclusive,
}

impl AccessMode {
    pub fn from_shared(shared: bool) -> Self {
        if shared {
            AccessMode::Shared
        } else {
            AccessMode::Exclusive
        }
    }

    /// Value for `PRAGMA locking_mode`.
    pub(crate) fn locking_mode(self) -> &'static str {
        match self {
            AccessMode::Shared => "NORMAL",
            AccessMode::Exclusive => "EXCLUSIVE",
        }
    }
}

/// File connection settings, rendered as `filename=<path>;connection=<mode>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub path: PathBuf,
    pub mode: AccessMode,
}

impl ConnectionDescriptor {
    pub fn new(path: impl Into<PathBuf>, mode: AccessMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection = match self.mode {
            AccessMode::Shared => "shared",
            AccessMode::Exclusive => "direct",
        };
        write!(
            f,
            "filename={};connection={}",
            self.path.display(),
            connection
        )
    }
}

/// Where a handle's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// A memdb store owned by a [`BackingBuffer`].
    Memory { store: String },
    /// A database file on disk.
    File(ConnectionDescriptor),
}

/// A live handle onto an open database.
///
/// Shared as `Arc<Database>`; the registry decides when it is disposed.
/// Callers that still hold a clone after disposal get
/// [`Error::HandleClosed`] from every operation.
pub struct Database {
    alias: String,
    storage: Storage,
    conn: Mutex<Option<Connection>>,
}

impl Database {
    pub(crate) fn new(alias: impl Into<String>, storage: Storage, conn: Connection) -> Self {
        Self {
            alias: alias.into(),
            storage,
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Alias the handle was registered under (normalised).
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, Storage::Memory { .. })
    }

    /// File path for file-backed handles.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File(descriptor) => Some(&descriptor.path),
            Storage::Memory { .. } => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().is_none()
    }

    /// Run `f` against the underlying connection.
    ///
    /// The handle's own mutex serialises callers sharing this handle; it is
    /// unrelated to the registry lock.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(Error::HandleClosed(self.alias.clone())),
        }
    }

    /// Like [`Database::with_connection`] with mutable access, for transactions.
    pub fn with_connection_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::HandleClosed(self.alias.clone())),
        }
    }

    /// Force pending WAL frames into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })
    }

    /// Write a consistent copy of the database to `dest` using the online
    /// backup API.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        self.with_connection(|conn| {
            conn.backup(DatabaseName::Main, dest, None)?;
            Ok(())
        })
    }

    /// Switch the file locking mode of a file-backed handle.
    ///
    /// The engine applies a new mode on the next file access, so the schema
    /// is read once here: switching to `Shared` releases a held exclusive
    /// lock, switching to `Exclusive` takes the lock again.
    pub(crate) fn set_locking(&self, mode: AccessMode) -> Result<()> {
        self.with_connection(|conn| {
            conn.pragma_update(None, "locking_mode", mode.locking_mode())?;
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(())
        })
    }

    /// Close the connection. Idempotent.
    pub(crate) fn dispose(&self) {
        let conn = self.lock().take();
        if let Some(conn) = conn {
            if let Err((_, err)) = conn.close() {
                // The connection is dropped regardless; sqlite3_close_v2 defers
                // the release until outstanding statements finish.
                warn!(alias = %self.alias, error = %err, "database did not close cleanly");
            }
            debug!(alias = %self.alias, "database handle disposed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("alias", &self.alias)
            .field("storage", &self.storage)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Byte store behind an in-memory database.
///
/// Holds an anchor connection on a named memdb store; the store stays
/// allocated while either the anchor or the handle is open. Writes reach
/// it only through the handle.
pub struct BackingBuffer {
    store: String,
    anchor: Option<Connection>,
}

impl BackingBuffer {
    pub(crate) fn new(store: String, anchor: Connection) -> Self {
        Self {
            store,
            anchor: Some(anchor),
        }
    }

    /// memdb store name.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Full image of the store from offset zero, in SQLite's file format.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let anchor = self
            .anchor
            .as_ref()
            .ok_or_else(|| Error::HandleClosed(self.store.clone()))?;
        let data = anchor.serialize(DatabaseName::Main)?;
        Ok(data.to_vec())
    }

    /// Write the full image to `path`, creating parent directories.
    pub fn persist_to(&self, path: &Path) -> Result<()> {
        let bytes = self.snapshot()?;
        ensure_parent_dir(path)?;
        std::fs::write(path, &bytes).map_err(|e| Error::io(path, e))?;
        debug!(store = %self.store, path = %path.display(), bytes = bytes.len(), "buffer persisted");
        Ok(())
    }

    /// Release the store. Idempotent.
    pub(crate) fn dispose(&mut self) {
        if let Some(anchor) = self.anchor.take() {
            if let Err((_, err)) = anchor.close() {
                warn!(store = %self.store, error = %err, "memory store did not close cleanly");
            }
        }
    }
}

impl Drop for BackingBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for BackingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingBuffer")
            .field("store", &self.store)
            .field("released", &self.anchor.is_none())
            .finish()
    }
}

/// Create the parent directories of `path` if they are missing.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// A registry entry: the handle and, for in-memory databases, its buffer.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) handle: Arc<Database>,
    pub(crate) buffer: Option<BackingBuffer>,
}

impl Entry {
    pub(crate) fn in_memory(handle: Database, buffer: BackingBuffer) -> Self {
        Self {
            handle: Arc::new(handle),
            buffer: Some(buffer),
        }
    }

    pub(crate) fn file_backed(handle: Database) -> Self {
        Self {
            handle: Arc::new(handle),
            buffer: None,
        }
    }

    /// Dispose the handle, then the buffer.
    pub(crate) fn dispose(mut self) {
        self.handle.dispose();
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_rendering() {
        let shared = ConnectionDescriptor::new("/tmp/a.db", AccessMode::Shared);
        assert_eq!(shared.to_string(), "filename=/tmp/a.db;connection=shared");

        let direct = ConnectionDescriptor::new("/tmp/a.db", AccessMode::from_shared(false));
        assert_eq!(direct.to_string(), "filename=/tmp/a.db;connection=direct");
    }

    #[test]
    fn test_disposed_handle_rejects_use() {
        let conn = Connection::open_in_memory().unwrap();
        let db = Database::new(
            "plain",
            Storage::Memory {
                store: "plain".into(),
            },
            conn,
        );
        assert!(db.with_connection(|c| Ok(c.is_autocommit())).unwrap());

        db.dispose();
        db.dispose();
        assert!(db.is_disposed());
        let err = db.with_connection(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::HandleClosed(alias) if alias == "plain"));
    }
}
