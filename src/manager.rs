//! Lifecycle of alias-keyed databases: create, look up, replace, close and
//! persist.
//!
//! Filesystem work (existence checks, flushing a buffer to disk) happens
//! outside the registry lock. Entries are detached under the lock and
//! disposed after it is released.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::alias::Alias;
use crate::config::{ConfigError, ManagerConfig};
use crate::database::{
    ensure_parent_dir, AccessMode, ConnectionDescriptor, Database, Entry, Storage,
};
use crate::error::{Error, Result};
use crate::factory::HandleFactory;
use crate::registry::{AliasRegistry, Occupied};

static GLOBAL: Lazy<ConnectionManager> = Lazy::new(ConnectionManager::default);

/// Options for [`ConnectionManager::create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Database file to open; `None` (or a blank path) creates an in-memory database.
    pub path: Option<PathBuf>,
    /// Dispose and replace an existing database registered under the alias.
    pub substitute_if_exists: bool,
    /// Open the file in shared rather than exclusive mode.
    pub shared: bool,
}

impl CreateOptions {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn substitute(mut self, substitute: bool) -> Self {
        self.substitute_if_exists = substitute;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    fn file_path(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
    }
}

/// Registry of open databases keyed by case-insensitive alias.
///
/// Construct independent instances with [`ConnectionManager::new`], or share
/// the process-wide one from [`ConnectionManager::global`].
///
/// # Panics
///
/// Every method taking an alias panics if the alias is blank.
#[derive(Debug)]
pub struct ConnectionManager {
    registry: AliasRegistry,
    factory: HandleFactory,
}

impl ConnectionManager {
    /// Build a manager whose handles use `config`.
    ///
    /// Fails with [`ConfigError::ValidationError`] when `config` does not
    /// pass [`ManagerConfig::validate`].
    pub fn new(config: ManagerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            registry: AliasRegistry::new(),
            factory: HandleFactory::new(config)?,
        })
    }

    /// The process-wide manager, created on first use.
    pub fn global() -> &'static ConnectionManager {
        &GLOBAL
    }

    pub fn config(&self) -> &ManagerConfig {
        self.factory.config()
    }

    /// Look up a registered database without creating one.
    pub fn get(&self, alias: &str) -> Option<Arc<Database>> {
        let alias = Alias::new(alias);
        let handle = self.registry.try_get(&alias);
        debug!(alias = %alias, found = handle.is_some(), "database lookup");
        handle
    }

    /// Return the database registered under `alias`.
    ///
    /// When it is missing and `create_if_missing` is set, an empty in-memory
    /// database is created and registered; otherwise
    /// [`Error::AliasNotFound`] is returned and nothing changes.
    pub fn get_or_create(&self, alias: &str, create_if_missing: bool) -> Result<Arc<Database>> {
        let alias = Alias::new(alias);
        if !create_if_missing {
            return self
                .registry
                .try_get(&alias)
                .ok_or_else(|| Error::AliasNotFound(alias.to_string()));
        }

        let (handle, created) = self.registry.get_or_insert_with(&alias, || {
            let (db, buffer) = self.factory.new_in_memory(&alias)?;
            Ok(Entry::in_memory(db, buffer))
        })?;
        if created {
            info!(alias = %alias, "created in-memory database on first use");
        }
        Ok(handle)
    }

    /// Create a database under `alias`.
    ///
    /// Without a path an in-memory database is created. With a path the file
    /// must exist ([`Error::PathNotFound`] otherwise) and is opened in shared
    /// or exclusive mode. An existing alias yields
    /// [`Error::AliasAlreadyExists`] unless `substitute_if_exists` is set, in
    /// which case the old database is disposed. The registry is unchanged on
    /// every error.
    pub fn create(&self, alias: &str, options: CreateOptions) -> Result<Arc<Database>> {
        let alias = Alias::new(alias);
        match options.file_path() {
            None => self.create_in_memory(alias, options.substitute_if_exists),
            Some(path) => {
                let descriptor =
                    ConnectionDescriptor::new(path, AccessMode::from_shared(options.shared));
                self.create_file_backed(alias, descriptor, options.substitute_if_exists)
            }
        }
    }

    /// [`ConnectionManager::create`] with substitution forced on.
    pub fn replace(&self, alias: &str, options: CreateOptions) -> Result<Arc<Database>> {
        self.create(alias, options.substitute(true))
    }

    fn create_in_memory(&self, alias: Alias, substitute: bool) -> Result<Arc<Database>> {
        if substitute {
            let (db, buffer) = self.factory.new_in_memory(&alias)?;
            let entry = Entry::in_memory(db, buffer);
            return self.install(alias, entry, true);
        }

        let (handle, created) = self.registry.get_or_insert_with(&alias, || {
            let (db, buffer) = self.factory.new_in_memory(&alias)?;
            Ok(Entry::in_memory(db, buffer))
        })?;
        if !created {
            return Err(Error::AliasAlreadyExists(alias.to_string()));
        }
        info!(alias = %alias, "created in-memory database");
        Ok(handle)
    }

    fn create_file_backed(
        &self,
        alias: Alias,
        descriptor: ConnectionDescriptor,
        substitute: bool,
    ) -> Result<Arc<Database>> {
        if !descriptor.path.is_file() {
            return Err(Error::PathNotFound(descriptor.path));
        }
        if !substitute && self.registry.contains(&alias) {
            return Err(Error::AliasAlreadyExists(alias.to_string()));
        }
        if !substitute {
            let db = self.factory.new_file_backed(&alias, descriptor)?;
            return self.install(alias, Entry::file_backed(db), false);
        }

        // An exclusive handle on the same file would block the new open, so
        // its lock is relaxed for the attempt and taken back on failure.
        let locked = self
            .registry
            .try_get(&alias)
            .filter(|existing| holds_exclusive_lock(existing, &descriptor.path));
        if let Some(existing) = &locked {
            existing.set_locking(AccessMode::Shared)?;
            debug!(alias = %alias, "relaxed exclusive lock of the previous handle");
        }

        match self.factory.new_file_backed(&alias, descriptor) {
            Ok(db) => self.install(alias, Entry::file_backed(db), true),
            Err(err) => {
                if let Some(existing) = locked {
                    if let Err(relock) = existing.set_locking(AccessMode::Exclusive) {
                        warn!(alias = %alias, error = %relock, "could not restore exclusive lock");
                    }
                }
                Err(err)
            }
        }
    }

    /// Register `entry`, disposing whatever it displaces, or disposing
    /// `entry` itself if another caller registered the alias first.
    fn install(&self, alias: Alias, entry: Entry, substitute: bool) -> Result<Arc<Database>> {
        let handle = Arc::clone(&entry.handle);
        let storage = handle.storage().clone();
        match self.registry.insert(alias.clone(), entry, substitute) {
            Ok(displaced) => {
                if let Some(old) = displaced {
                    info!(alias = %alias, "replaced existing database");
                    old.dispose();
                }
                info!(alias = %alias, storage = ?storage, "database registered");
                Ok(handle)
            }
            Err(Occupied(rejected)) => {
                warn!(alias = %alias, "alias registered concurrently; discarding new handle");
                rejected.dispose();
                Err(Error::AliasAlreadyExists(alias.to_string()))
            }
        }
    }

    /// Unregister and dispose the database under `alias`.
    ///
    /// With `persist_path`, an in-memory database's buffer is written there
    /// first (parent directories are created). The handle and buffer are
    /// disposed even when that write fails, in which case
    /// [`Error::Persist`] is returned. A second close of the same alias
    /// returns [`Error::AliasNotFound`].
    pub fn close(&self, alias: &str, persist_path: Option<&Path>) -> Result<()> {
        let alias = Alias::new(alias);
        let entry = self
            .registry
            .remove(&alias)
            .ok_or_else(|| Error::AliasNotFound(alias.to_string()))?;

        let flushed = match (persist_path, entry.buffer.as_ref()) {
            (Some(path), Some(buffer)) => buffer.persist_to(path).map_err(|source| {
                warn!(alias = %alias, path = %path.display(), error = %source, "failed to persist database");
                Error::Persist {
                    alias: alias.to_string(),
                    path: path.to_path_buf(),
                    source: Box::new(source),
                }
            }),
            _ => Ok(()),
        };

        entry.dispose();
        info!(alias = %alias, persisted = persist_path.is_some() && flushed.is_ok(), "database closed");
        flushed
    }

    /// Write the current image of a registered database to `path` and keep
    /// it open.
    pub fn save(&self, alias: &str, path: &Path) -> Result<()> {
        let alias = Alias::new(alias);
        let handle = self
            .registry
            .try_get(&alias)
            .ok_or_else(|| Error::AliasNotFound(alias.to_string()))?;

        ensure_parent_dir(path)?;
        if handle.is_in_memory() {
            // Serialised through the handle so the image matches the last
            // committed write seen by its callers.
            let bytes = handle.with_connection(|conn| {
                Ok(conn.serialize(rusqlite::DatabaseName::Main)?.to_vec())
            })?;
            std::fs::write(path, bytes).map_err(|e| Error::io(path, e))?;
        } else {
            handle.backup_to(path)?;
        }
        info!(alias = %alias, path = %path.display(), "database saved");
        Ok(())
    }

    /// Close every registered database without persisting.
    pub fn close_all(&self) -> usize {
        let drained = self.registry.drain();
        let count = drained.len();
        for (alias, entry) in drained {
            entry.dispose();
            debug!(alias = %alias, "database closed");
        }
        if count > 0 {
            info!(count, "closed all databases");
        }
        count
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.registry.contains(&Alias::new(alias))
    }

    /// Registered aliases in normalised form, sorted.
    pub fn aliases(&self) -> Vec<String> {
        self.registry.aliases()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            registry: AliasRegistry::new(),
            factory: HandleFactory::default(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn holds_exclusive_lock(handle: &Database, path: &Path) -> bool {
    match handle.storage() {
        Storage::File(descriptor) => {
            descriptor.mode == AccessMode::Exclusive && is_same_file(&descriptor.path, path)
        }
        Storage::Memory { .. } => false,
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
