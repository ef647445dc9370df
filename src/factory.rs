//! Opens engine handles: fresh in-memory databases over a new backing
//! buffer, or existing database files.

use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::alias::Alias;
use crate::config::{ConfigError, ManagerConfig};
use crate::database::{AccessMode, BackingBuffer, ConnectionDescriptor, Database, Storage};
use crate::error::{Error, Result};

static STORE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Builds handles with the settings of one [`ManagerConfig`].
#[derive(Debug, Clone)]
pub struct HandleFactory {
    config: ManagerConfig,
}

impl HandleFactory {
    /// Build a factory for `config`, which must pass
    /// [`ManagerConfig::validate`].
    pub fn new(config: ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Allocate an empty backing buffer and open a handle over it.
    ///
    /// If opening the handle fails the buffer is released before the error
    /// is returned.
    pub fn new_in_memory(&self, alias: &Alias) -> Result<(Database, BackingBuffer)> {
        let store = self.next_store_name();
        let uri = format!("file:/{}?vfs=memdb", store);

        let anchor = Connection::open_with_flags(&uri, memory_flags())?;
        anchor.busy_timeout(self.config.busy_timeout())?;
        let buffer = BackingBuffer::new(store.clone(), anchor);

        // `buffer` drops (and releases the store) if either step fails.
        let conn = Connection::open_with_flags(&uri, memory_flags())?;
        self.configure(&conn)?;

        debug!(alias = %alias, store = %store, "opened in-memory database");
        Ok((
            Database::new(alias.as_str(), Storage::Memory { store }, conn),
            buffer,
        ))
    }

    /// Open an existing database file.
    ///
    /// Only existence is checked here; a file the engine cannot read fails
    /// with [`Error::Engine`].
    pub fn new_file_backed(&self, alias: &Alias, descriptor: ConnectionDescriptor) -> Result<Database> {
        if !descriptor.path.is_file() {
            return Err(Error::PathNotFound(descriptor.path));
        }

        let conn = Connection::open_with_flags(&descriptor.path, file_flags())?;
        self.configure(&conn)?;
        if descriptor.mode == AccessMode::Exclusive {
            conn.pragma_update(None, "locking_mode", descriptor.mode.locking_mode())?;
        }
        if let Some(mode) = self.config.journal_mode {
            conn.pragma_update(None, "journal_mode", mode.as_sql())?;
        }
        // Touch the schema so a corrupt file fails now rather than on first use.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;

        debug!(alias = %alias, descriptor = %descriptor, "opened file-backed database");
        Ok(Database::new(alias.as_str(), Storage::File(descriptor), conn))
    }

    fn configure(&self, conn: &Connection) -> Result<()> {
        conn.busy_timeout(self.config.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", self.config.foreign_keys)?;
        Ok(())
    }

    fn next_store_name(&self) -> String {
        let seq = STORE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{}",
            self.config.memory_store_prefix.trim(),
            std::process::id(),
            seq
        )
    }
}

impl Default for HandleFactory {
    fn default() -> Self {
        Self {
            config: ManagerConfig::default(),
        }
    }
}

fn memory_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn file_flags() -> OpenFlags {
    // No CREATE: a missing file must never be conjured into an empty database.
    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
}
