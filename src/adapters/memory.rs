//! In-process collaborator implementations.
//!
//! Used by the test suites and for embedding the gateway without a Redis
//! server. Each type records what it was asked so callers can inspect it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{BridgeTransport, IdAllocator, PermissionOracle, ReplayCache, UpstreamLink};
use crate::domain::Identity;
use crate::error::GatewayError;

/// A command issued to [`MemoryUpstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// `subscribe(channel)`
    Subscribe(String),
    /// `unsubscribe(channel)`
    Unsubscribe(String),
}

/// Upstream link recording every command and the resulting active set.
#[derive(Debug, Default)]
pub struct MemoryUpstream {
    commands: Mutex<Vec<UpstreamCommand>>,
    active: Mutex<HashSet<String>>,
}

impl MemoryUpstream {
    /// Creates a link with no active subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command issued so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<UpstreamCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns `true` if `channel` is currently subscribed upstream.
    #[must_use]
    pub fn is_active(&self, channel: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(channel)
    }
}

impl UpstreamLink for MemoryUpstream {
    fn subscribe(&self, channel: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string());
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(UpstreamCommand::Subscribe(channel.to_string()));
    }

    fn unsubscribe(&self, channel: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(UpstreamCommand::Unsubscribe(channel.to_string()));
    }
}

/// Allocator handing out `1, 2, 3, …`.
#[derive(Debug)]
pub struct SequentialIdAllocator {
    next: AtomicU64,
}

impl SequentialIdAllocator {
    /// Creates an allocator whose first id is `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[async_trait]
impl IdAllocator for SequentialIdAllocator {
    async fn allocate(&self) -> Result<u64, GatewayError> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Oracle answering from fixed tables.
///
/// Sessions map to user ids; a channel is allowed if it is public or the
/// identity is on its allow list. Everything else is denied.
#[derive(Debug, Default)]
pub struct StaticOracle {
    sessions: HashMap<String, u64>,
    public: HashSet<String>,
    allowed: HashMap<String, HashSet<Identity>>,
}

impl StaticOracle {
    /// Creates an oracle that knows no session and denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a session credential to a user id.
    #[must_use]
    pub fn with_session(mut self, session: &str, user_id: u64) -> Self {
        self.sessions.insert(session.to_string(), user_id);
        self
    }

    /// Opens `channel` to every identity.
    #[must_use]
    pub fn with_public_channel(mut self, channel: &str) -> Self {
        self.public.insert(channel.to_string());
        self
    }

    /// Opens `channel` to one identity.
    #[must_use]
    pub fn allow(mut self, identity: Identity, channel: &str) -> Self {
        self.allowed
            .entry(channel.to_string())
            .or_default()
            .insert(identity);
        self
    }
}

#[async_trait]
impl PermissionOracle for StaticOracle {
    async fn identify(&self, session: &str) -> Result<Option<u64>, GatewayError> {
        Ok(self.sessions.get(session).copied())
    }

    async fn check_subscription(
        &self,
        identity: Identity,
        channel: &str,
    ) -> Result<bool, GatewayError> {
        Ok(self.public.contains(channel)
            || self
                .allowed
                .get(channel)
                .is_some_and(|ids| ids.contains(&identity)))
    }
}

/// Replay cache backed by a map of `(channel, index)` entries.
#[derive(Debug, Default)]
pub struct MemoryReplayCache {
    messages: Mutex<HashMap<(String, u64), String>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl MemoryReplayCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message and advances the channel counter if needed.
    pub fn store(&self, channel: &str, index: u64, content: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((channel.to_string(), index), content.to_string());
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(channel.to_string()).or_insert(index);
        *counter = (*counter).max(index);
    }

    /// Sets the channel counter without storing a message (an evicted
    /// tail).
    pub fn set_last_index(&self, channel: &str, index: u64) {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string(), index);
    }
}

#[async_trait]
impl ReplayCache for MemoryReplayCache {
    async fn last_index(&self, channel: &str) -> Result<Option<u64>, GatewayError> {
        Ok(self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .copied())
    }

    async fn message(&self, channel: &str, index: u64) -> Result<Option<String>, GatewayError> {
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(channel.to_string(), index))
            .cloned())
    }
}

/// Bridge transport collecting every published payload.
#[derive(Debug, Default)]
pub struct MemoryBridgeTransport {
    published: Mutex<Vec<String>>,
}

impl MemoryBridgeTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BridgeTransport for MemoryBridgeTransport {
    async fn publish(&self, payload: String) -> Result<(), GatewayError> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_ids_increase() {
        let alloc = SequentialIdAllocator::starting_at(10);
        assert_eq!(tokio_test::assert_ok!(alloc.allocate().await), 10);
        assert_eq!(tokio_test::assert_ok!(alloc.allocate().await), 11);
    }

    #[tokio::test]
    async fn static_oracle_checks_tables() {
        let oracle = StaticOracle::new()
            .with_session("abc", 7)
            .with_public_channel("news")
            .allow(Identity::User(7), "private-7");

        assert_eq!(oracle.identify("abc").await.ok(), Some(Some(7)));
        assert_eq!(oracle.identify("zzz").await.ok(), Some(None));
        assert_eq!(
            oracle.check_subscription(Identity::Guest, "news").await.ok(),
            Some(true)
        );
        assert_eq!(
            oracle
                .check_subscription(Identity::Guest, "private-7")
                .await
                .ok(),
            Some(false)
        );
        assert_eq!(
            oracle
                .check_subscription(Identity::User(7), "private-7")
                .await
                .ok(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn replay_cache_tracks_highest_index() {
        let cache = MemoryReplayCache::new();
        cache.store("news", 6, "six");
        cache.store("news", 4, "four");
        assert_eq!(cache.last_index("news").await.ok(), Some(Some(6)));
        assert_eq!(cache.message("news", 5).await.ok(), Some(None));
        assert_eq!(
            cache.message("news", 4).await.ok(),
            Some(Some("four".to_string()))
        );
    }
}
