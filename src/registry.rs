//! Alias → entry bookkeeping behind a single mutex.
//!
//! Every method holds the lock only for the map operation itself (plus the
//! in-memory open in [`AliasRegistry::get_or_insert_with`]); entries that
//! leave the map are handed back so the caller can dispose them after the
//! lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::alias::Alias;
use crate::database::{Database, Entry};
use crate::error::Result;

/// Result of an insert that found the alias already taken.
#[derive(Debug)]
pub(crate) struct Occupied(pub(crate) Entry);

#[derive(Debug, Default)]
pub(crate) struct AliasRegistry {
    entries: Mutex<HashMap<Alias, Entry>>,
}

impl AliasRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn try_get(&self, alias: &Alias) -> Option<Arc<Database>> {
        self.lock().get(alias).map(|entry| Arc::clone(&entry.handle))
    }

    pub(crate) fn contains(&self, alias: &Alias) -> bool {
        self.lock().contains_key(alias)
    }

    /// Return the registered handle, or build and register one.
    ///
    /// The existence check, `make` and the insert form one critical section,
    /// so concurrent callers for the same alias create exactly one entry.
    pub(crate) fn get_or_insert_with(
        &self,
        alias: &Alias,
        make: impl FnOnce() -> Result<Entry>,
    ) -> Result<(Arc<Database>, bool)> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(alias) {
            return Ok((Arc::clone(&entry.handle), false));
        }
        let entry = make()?;
        let handle = Arc::clone(&entry.handle);
        entries.insert(alias.clone(), entry);
        Ok((handle, true))
    }

    /// Register `entry`.
    ///
    /// When the alias is taken and `replace` is false the new entry is handed
    /// back untouched in `Err`; otherwise the displaced entry (if any) is
    /// returned for disposal.
    pub(crate) fn insert(
        &self,
        alias: Alias,
        entry: Entry,
        replace: bool,
    ) -> std::result::Result<Option<Entry>, Occupied> {
        let mut entries = self.lock();
        if !replace && entries.contains_key(&alias) {
            return Err(Occupied(entry));
        }
        Ok(entries.insert(alias, entry))
    }

    /// Detach and return the entry for `alias`.
    pub(crate) fn remove(&self, alias: &Alias) -> Option<Entry> {
        self.lock().remove(alias)
    }

    /// Detach every entry.
    pub(crate) fn drain(&self) -> Vec<(Alias, Entry)> {
        self.lock().drain().collect()
    }

    pub(crate) fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .lock()
            .keys()
            .map(|alias| alias.as_str().to_string())
            .collect();
        aliases.sort();
        aliases
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Alias, Entry>> {
        // Map operations cannot leave the map half-updated, so a poisoned
        // lock still guards consistent data.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::HandleFactory;

    fn memory_entry(factory: &HandleFactory, alias: &Alias) -> Entry {
        let (db, buffer) = factory.new_in_memory(alias).unwrap();
        Entry::in_memory(db, buffer)
    }

    #[test]
    fn test_insert_rejects_duplicate_without_replace() {
        let factory = HandleFactory::default();
        let registry = AliasRegistry::new();
        let alias = Alias::new("Orders");

        let first = memory_entry(&factory, &alias);
        let first_handle = Arc::clone(&first.handle);
        assert!(registry.insert(alias.clone(), first, false).unwrap().is_none());

        let second = memory_entry(&factory, &alias);
        let Occupied(rejected) = registry
            .insert(Alias::new("ORDERS "), second, false)
            .unwrap_err();
        rejected.dispose();

        let current = registry.try_get(&alias).unwrap();
        assert!(Arc::ptr_eq(&current, &first_handle));
        assert!(!current.is_disposed());
    }

    #[test]
    fn test_replace_returns_displaced_entry() {
        let factory = HandleFactory::default();
        let registry = AliasRegistry::new();
        let alias = Alias::new("orders");

        registry
            .insert(alias.clone(), memory_entry(&factory, &alias), false)
            .unwrap();
        let displaced = registry
            .insert(alias.clone(), memory_entry(&factory, &alias), true)
            .unwrap()
            .expect("previous entry");
        let old = Arc::clone(&displaced.handle);
        displaced.dispose();

        assert!(old.is_disposed());
        assert!(!registry.try_get(&alias).unwrap().is_disposed());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_detaches() {
        let factory = HandleFactory::default();
        let registry = AliasRegistry::new();
        let alias = Alias::new("gone");

        registry
            .insert(alias.clone(), memory_entry(&factory, &alias), false)
            .unwrap();
        assert!(registry.remove(&alias).is_some());
        assert!(registry.remove(&alias).is_none());
        assert!(!registry.contains(&alias));
        assert!(registry.aliases().is_empty());
    }
}
