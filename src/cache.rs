//! Mark-and-sweep cache of per-entity artifacts.
//!
//! Entries are keyed by an [`EntityPath`] plus a free-form key. Each entry
//! carries an "accessed since reset" flag: a read pass calls
//! [`ArtifactCache::reset_access_counts`] before it starts and
//! [`ArtifactCache::clear_unused`] when it ends, which evicts everything the
//! pass did not touch.

use crate::io::EntityKind;
use hashbrown::HashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased payload stored by the materialization layer.
pub type Artifact = Arc<dyn Any + Send + Sync>;

/// Stable identity of an entity: owning file plus containment chain.
///
/// Regions are reopened freely, so identity must never depend on the address
/// of an in-memory object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityPath(String);

impl EntityPath {
    pub fn new(file: &str, kind: EntityKind, name: &str) -> Self {
        Self(format!("{file}::{kind}/{name}"))
    }

    /// Path of a nested entity.
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{name}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    accessed: bool,
}

/// Keyed artifact store with access-flag eviction.
#[derive(Debug)]
pub struct ArtifactCache<V = Artifact> {
    entries: HashMap<EntityPath, HashMap<String, Entry<V>>>,
}

impl<V> Default for ArtifactCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> ArtifactCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry and mark it as accessed.
    pub fn find(&mut self, path: &EntityPath, key: &str) -> Option<&V> {
        let entry = self.entries.get_mut(path)?.get_mut(key)?;
        entry.accessed = true;
        Some(&entry.value)
    }

    /// Store (or replace) an entry, marked as accessed.
    pub fn insert(&mut self, path: EntityPath, key: impl Into<String>, value: V) {
        self.entries.entry(path).or_default().insert(
            key.into(),
            Entry {
                value,
                accessed: true,
            },
        );
    }

    /// Clear every entry's access flag.
    pub fn reset_access_counts(&mut self) {
        for entry in self.entries.values_mut().flat_map(|m| m.values_mut()) {
            entry.accessed = false;
        }
    }

    /// Evict every entry not accessed since the last reset.
    pub fn clear_unused(&mut self) {
        let before = self.len();
        self.entries.retain(|_, keyed| {
            keyed.retain(|_, e| e.accessed);
            !keyed.is_empty()
        });
        log::trace!("cache sweep evicted {} of {before} entries", before - self.len());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
