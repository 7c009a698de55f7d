//! Write-once table cache shared by every branch of a run.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::FxHashMap;

use crate::error::{Result, lock_error};
use crate::model::Table;

/// Cache key: one sheet of one workspace file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub file_id: String,
    pub sheet_name: String,
}

impl CacheKey {
    pub fn new(file_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            sheet_name: sheet_name.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file_id, self.sheet_name)
    }
}

type Slot = Arc<Mutex<Option<Arc<Table>>>>;

/// Table cache keyed by `(file_id, sheet_name)`.
///
/// Every key owns a slot whose mutex is held while the table loads, so two
/// branches asking for the same sheet at once trigger a single read and both
/// observe the same `Arc<Table>`. A populated slot is never replaced.
#[derive(Default)]
pub struct TableCache {
    slots: RwLock<FxHashMap<CacheKey, Slot>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CacheKey) -> Result<Slot> {
        if let Some(slot) = self.slots.read().map_err(lock_error)?.get(key) {
            return Ok(Arc::clone(slot));
        }
        let mut slots = self.slots.write().map_err(lock_error)?;
        Ok(Arc::clone(slots.entry(key.clone()).or_default()))
    }

    /// Get a cached table without loading it.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Arc<Table>>> {
        let Some(slot) = self.slots.read().map_err(lock_error)?.get(key).cloned() else {
            return Ok(None);
        };
        let table = slot.lock().map_err(lock_error)?.clone();
        Ok(table)
    }

    pub fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Return the cached table, or run `load` and cache what it returns.
    ///
    /// The flag is `true` on a cache hit. A failed load leaves the slot empty
    /// so a later request can retry.
    pub fn get_or_load<F>(&self, key: &CacheKey, load: F) -> Result<(Arc<Table>, bool)>
    where
        F: FnOnce() -> Result<Table>,
    {
        let slot = self.slot(key)?;
        let mut guard = slot.lock().map_err(lock_error)?;
        if let Some(table) = guard.as_ref() {
            return Ok((Arc::clone(table), true));
        }
        let table = Arc::new(load()?);
        *guard = Some(Arc::clone(&table));
        Ok((table, false))
    }

    /// Store `table` unless the key is already populated.
    ///
    /// Returns `true` when the table was stored.
    pub fn insert_if_absent(&self, key: CacheKey, table: Table) -> Result<bool> {
        let slot = self.slot(&key)?;
        let mut guard = slot.lock().map_err(lock_error)?;
        if guard.is_some() {
            return Ok(false);
        }
        *guard = Some(Arc::new(table));
        Ok(true)
    }

    /// Number of populated entries.
    pub fn len(&self) -> Result<usize> {
        let slots = self.slots.read().map_err(lock_error)?;
        let mut count = 0;
        for slot in slots.values() {
            if slot.lock().map_err(lock_error)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Populated keys, sorted.
    pub fn keys(&self) -> Result<Vec<CacheKey>> {
        let slots = self.slots.read().map_err(lock_error)?;
        let mut keys = Vec::with_capacity(slots.len());
        for (key, slot) in slots.iter() {
            if slot.lock().map_err(lock_error)?.is_some() {
                keys.push(key.clone());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<()> {
        self.slots.write().map_err(lock_error)?.clear();
        Ok(())
    }
}
