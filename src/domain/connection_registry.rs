//! Process-wide table of live connections keyed by their allocated id.
//!
//! [`ConnectionRegistry`] is the only cross-connection table. A connection
//! is inserted when its id is assigned and removed on teardown; the
//! administrative broadcast enumerates it and guest admission counts it.
//!
//! Critical sections are short and never span an `.await`, so a
//! `std::sync::RwLock` is used rather than an async lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{ConnectionHandle, ConnectionId, Identity};

#[derive(Debug)]
struct Entry {
    handle: ConnectionHandle,
    identity: Identity,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its freshly assigned id.
    ///
    /// Returns `false` (and leaves the table untouched) if the id is
    /// already taken, which would mean the allocator handed out a
    /// duplicate.
    pub fn insert(&self, id: ConnectionId, handle: ConnectionHandle) -> bool {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&id) {
            return false;
        }
        map.insert(
            id,
            Entry {
                handle,
                identity: Identity::Unresolved,
            },
        );
        true
    }

    /// Records the resolved identity of a registered connection.
    pub fn set_identity(&self, id: ConnectionId, identity: Identity) {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = map.get_mut(&id) {
            entry.identity = identity;
        }
    }

    /// Marks `id` as a guest if fewer than `limit` other guests are live in
    /// this registry. Guests of other gateway instances are not counted.
    ///
    /// Counting and marking happen under one write lock, so concurrent
    /// resolutions cannot both take the last slot. Returns `false` when
    /// the limit is reached or `id` is not registered.
    pub fn try_admit_guest(&self, id: ConnectionId, limit: usize) -> bool {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let guests = map
            .iter()
            .filter(|(other, entry)| **other != id && entry.identity.is_guest())
            .count();
        if guests >= limit {
            tracing::warn!(guests, limit, connection_id = %id, "guest connection limit reached");
            return false;
        }
        match map.get_mut(&id) {
            Some(entry) => {
                entry.identity = Identity::Guest;
                true
            }
            None => false,
        }
    }

    /// Removes a connection. Returns `true` if it was registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Returns the handle of a live connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|entry| entry.handle.clone())
    }

    /// Snapshot of every live connection, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionHandle)> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = map
            .iter()
            .map(|(id, entry)| (*id, entry.handle.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Number of live guest connections.
    #[must_use]
    pub fn guest_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.identity.is_guest())
            .count()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
