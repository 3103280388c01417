//! Redis-backed collaborators.
//!
//! - [`RedisSubscriber`] owns one pub/sub connection and forwards every
//!   received `(channel, payload)` pair to an mpsc sink. It serves as the
//!   dispatcher's [`UpstreamLink`] and as the bridge's control listener.
//! - [`RedisPublisher`] publishes bridge messages on one channel.
//! - [`RedisIdAllocator`] allocates ids with `INCR` on a counter key.
//! - [`RedisReplayCache`] reads `channel:index` message keys and the
//!   per-channel counter.
//! - [`RedisPermissionOracle`] resolves sessions with `GET` and checks
//!   subscriptions with `SISMEMBER`.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;

use super::{
    BridgeTransport, IdAllocator, PermissionOracle, ReplayCache, UpstreamLink, replay_counter_key,
    replay_message_key,
};
use crate::config::KeyLayout;
use crate::domain::Identity;
use crate::error::GatewayError;

/// Subscription change requested from the subscriber task.
#[derive(Debug)]
enum SubscriberCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// One step of the subscriber loop.
enum Step {
    Command(Option<SubscriberCommand>),
    Message(Option<redis::Msg>),
}

/// Handle to a task owning a Redis pub/sub connection.
#[derive(Debug, Clone)]
pub struct RedisSubscriber {
    commands: mpsc::UnboundedSender<SubscriberCommand>,
}

impl RedisSubscriber {
    /// Opens a pub/sub connection and spawns the task serving it.
    ///
    /// Messages are forwarded to `sink` as `(channel, payload)`. The task
    /// ends when every handle is dropped, the sink is closed, or the
    /// connection is lost; reconnecting is left to the process supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Redis`] if the connection cannot be opened.
    pub async fn connect(
        client: &redis::Client,
        sink: mpsc::UnboundedSender<(String, String)>,
    ) -> Result<Self, GatewayError> {
        let pubsub = client.get_async_pubsub().await?;
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_subscriber(pubsub, rx, sink));
        Ok(Self { commands })
    }

    fn send(&self, command: SubscriberCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("redis subscriber task is gone, dropping command");
        }
    }
}

impl UpstreamLink for RedisSubscriber {
    fn subscribe(&self, channel: &str) {
        self.send(SubscriberCommand::Subscribe(channel.to_string()));
    }

    fn unsubscribe(&self, channel: &str) {
        self.send(SubscriberCommand::Unsubscribe(channel.to_string()));
    }
}

async fn run_subscriber(
    mut pubsub: redis::aio::PubSub,
    mut commands: mpsc::UnboundedReceiver<SubscriberCommand>,
    sink: mpsc::UnboundedSender<(String, String)>,
) {
    loop {
        let step = {
            let mut messages = pubsub.on_message();
            tokio::select! {
                command = commands.recv() => Step::Command(command),
                message = messages.next() => Step::Message(message),
            }
        };
        match step {
            Step::Command(Some(SubscriberCommand::Subscribe(channel))) => {
                if let Err(err) = pubsub.subscribe(&channel).await {
                    tracing::error!(channel = %channel, error = %err, "redis subscribe failed");
                }
            }
            Step::Command(Some(SubscriberCommand::Unsubscribe(channel))) => {
                if let Err(err) = pubsub.unsubscribe(&channel).await {
                    tracing::error!(channel = %channel, error = %err, "redis unsubscribe failed");
                }
            }
            Step::Command(None) => break,
            Step::Message(Some(message)) => {
                let channel = message.get_channel_name().to_string();
                match message.get_payload::<String>() {
                    Ok(payload) => {
                        if sink.send((channel, payload)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(channel = %channel, error = %err, "non-text pub/sub payload");
                    }
                }
            }
            Step::Message(None) => {
                tracing::error!("redis pub/sub stream ended");
                break;
            }
        }
    }
    tracing::debug!("redis subscriber stopped");
}

/// Publishes bridge messages on a fixed channel.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: MultiplexedConnection,
    channel: String,
}

impl std::fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl RedisPublisher {
    /// Creates a publisher on `channel`.
    #[must_use]
    pub fn new(conn: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl BridgeTransport for RedisPublisher {
    async fn publish(&self, payload: String) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        Ok(())
    }
}

/// `INCR`-based id allocator.
#[derive(Clone)]
pub struct RedisIdAllocator {
    conn: MultiplexedConnection,
    key: String,
}

impl std::fmt::Debug for RedisIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisIdAllocator")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RedisIdAllocator {
    /// Creates an allocator incrementing `key`.
    #[must_use]
    pub fn new(conn: MultiplexedConnection, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl IdAllocator for RedisIdAllocator {
    async fn allocate(&self) -> Result<u64, GatewayError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(&self.key, 1u64).await?;
        Ok(id)
    }
}

/// Replay cache reading `<prefix><channel>:<index>` keys.
#[derive(Clone)]
pub struct RedisReplayCache {
    conn: MultiplexedConnection,
    prefix: String,
}

impl std::fmt::Debug for RedisReplayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisReplayCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisReplayCache {
    /// Creates a cache reader using `prefix` for every key.
    #[must_use]
    pub fn new(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl ReplayCache for RedisReplayCache {
    async fn last_index(&self, channel: &str) -> Result<Option<u64>, GatewayError> {
        let mut conn = self.conn.clone();
        let last: Option<u64> = conn.get(replay_counter_key(&self.prefix, channel)).await?;
        Ok(last)
    }

    async fn message(&self, channel: &str, index: u64) -> Result<Option<String>, GatewayError> {
        let mut conn = self.conn.clone();
        let message: Option<String> = conn
            .get(replay_message_key(&self.prefix, channel, index))
            .await?;
        Ok(message)
    }
}

/// Oracle backed by session keys and channel membership sets.
#[derive(Clone)]
pub struct RedisPermissionOracle {
    conn: MultiplexedConnection,
    keys: KeyLayout,
}

impl std::fmt::Debug for RedisPermissionOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPermissionOracle")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RedisPermissionOracle {
    /// Creates an oracle reading the keys described by `keys`.
    #[must_use]
    pub fn new(conn: MultiplexedConnection, keys: KeyLayout) -> Self {
        Self { conn, keys }
    }
}

#[async_trait]
impl PermissionOracle for RedisPermissionOracle {
    async fn identify(&self, session: &str) -> Result<Option<u64>, GatewayError> {
        let mut conn = self.conn.clone();
        let key = format!("{}{session}", self.keys.session_prefix);
        let user_id: Option<u64> = conn.get(key).await?;
        Ok(user_id)
    }

    async fn check_subscription(
        &self,
        identity: Identity,
        channel: &str,
    ) -> Result<bool, GatewayError> {
        let mut conn = self.conn.clone();
        let public: bool = conn.sismember(&self.keys.public_channels, channel).await?;
        if public {
            return Ok(true);
        }
        let Some(user_id) = identity.user_id() else {
            return Ok(false);
        };
        let acl = format!("{}{channel}", self.keys.channel_acl_prefix);
        let allowed: bool = conn.sismember(acl, user_id).await?;
        Ok(allowed)
    }
}
