//! Seams to the external collaborators the gateway depends on.
//!
//! The gateway core never talks to Redis (or anything else) directly. It
//! consumes these traits:
//!
//! | Trait               | Collaborator                                 |
//! |---------------------|----------------------------------------------|
//! | [`UpstreamLink`]    | pub/sub bus subscription management          |
//! | [`IdAllocator`]     | process-unique identifier allocation         |
//! | [`PermissionOracle`]| identity resolution and subscription checks  |
//! | [`ReplayCache`]     | stored indexed messages for replay           |
//! | [`BridgeTransport`] | outbound metadata replication channel        |
//!
//! [`redis_store`] implements all of them against a Redis server; [`memory`]
//! implements them in-process for tests and embedding.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::domain::Identity;
use crate::error::GatewayError;

/// Subscription management on the upstream bus.
///
/// Both calls are fire-and-forget: they enqueue a command and return
/// immediately. Messages received on subscribed channels are pumped into
/// [`crate::dispatch::Dispatcher::handle_bus_message`].
pub trait UpstreamLink: Send + Sync + std::fmt::Debug {
    /// Starts receiving messages published on `channel`.
    fn subscribe(&self, channel: &str);

    /// Stops receiving messages published on `channel`.
    fn unsubscribe(&self, channel: &str);
}

/// Allocator of process-unique identifiers.
#[async_trait]
pub trait IdAllocator: Send + Sync + std::fmt::Debug {
    /// Allocates a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be reached.
    async fn allocate(&self) -> Result<u64, GatewayError>;
}

/// Authorization and identity decisions.
#[async_trait]
pub trait PermissionOracle: Send + Sync + std::fmt::Debug {
    /// Resolves a session credential to a user id. `Ok(None)` means the
    /// session is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself failed.
    async fn identify(&self, session: &str) -> Result<Option<u64>, GatewayError>;

    /// Decides whether `identity` may subscribe to `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision could not be made.
    async fn check_subscription(
        &self,
        identity: Identity,
        channel: &str,
    ) -> Result<bool, GatewayError>;
}

/// Read access to the indexed messages retained for replay.
#[async_trait]
pub trait ReplayCache: Send + Sync + std::fmt::Debug {
    /// Highest index ever published on `channel`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter could not be read.
    async fn last_index(&self, channel: &str) -> Result<Option<u64>, GatewayError>;

    /// Stored content of message `index` on `channel`, if still retained.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup failed.
    async fn message(&self, channel: &str, index: u64) -> Result<Option<String>, GatewayError>;
}

/// Outbound side of the metadata replication channel.
#[async_trait]
pub trait BridgeTransport: Send + Sync + std::fmt::Debug {
    /// Publishes one serialized bridge message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be published.
    async fn publish(&self, payload: String) -> Result<(), GatewayError>;
}

/// Cache key of message `index` on `channel`.
#[must_use]
pub fn replay_message_key(prefix: &str, channel: &str, index: u64) -> String {
    format!("{prefix}{channel}:{index}")
}

/// Cache key of the last published index on `channel`.
#[must_use]
pub fn replay_counter_key(prefix: &str, channel: &str) -> String {
    format!("{prefix}{channel}:counter")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_keys_follow_channel_index_layout() {
        assert_eq!(replay_message_key("", "news", 4), "news:4");
        assert_eq!(replay_message_key("stream:", "news", 4), "stream:news:4");
        assert_eq!(replay_counter_key("", "news"), "news:counter");
    }
}
