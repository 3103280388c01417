//! WebSocket connection state machine.
//!
//! [`Connection`] holds everything one client owns and reacts to two inputs:
//! client lines ([`Connection::handle_line`]) and mailbox events
//! ([`Connection::handle_event`]). It never awaits. Collaborator calls run
//! in spawned tasks that post their result back to the mailbox, and frames
//! for the client are queued in an outbox that [`run_connection`] drains.
//!
//! Two FIFO queues defer work until its dependency exists:
//!
//! - bridge actions recorded before the connection id is allocated are
//!   replayed right after `connectionCreated`;
//! - subscribe requests made before the identity is resolved are sent to
//!   the oracle once it is.
//!
//! Replay keeps live messages of the replayed channel aside until the
//! stored ones are sent, then drops any live indexed message the replay
//! already covered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::heartbeat::HeartbeatTimer;
use super::protocol::{self, ClientCommand};
use super::upgrade::UpgradeInfo;
use crate::app_state::GatewayContext;
use crate::dispatch::BusPayload;
use crate::domain::{
    ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionKey, Identity, ReplayEntry,
};
use crate::error::GatewayError;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Identity not resolved yet.
    Unidentified,
    /// Identity resolved (guest or user), no granted subscription.
    Identified,
    /// At least one granted subscription.
    Active,
    /// Torn down.
    Destroyed,
}

/// Bridge call waiting for the connection id.
#[derive(Debug)]
enum BridgeAction {
    AddField { key: &'static str, value: Option<Value> },
}

/// Action waiting for the identity.
#[derive(Debug)]
enum PendingAction {
    RequestPermission(String),
}

/// One client connection.
#[derive(Debug)]
pub struct Connection {
    ctx: Arc<GatewayContext>,
    handle: ConnectionHandle,
    info: UpgradeInfo,
    id: Option<ConnectionId>,
    identity: Identity,
    destroyed: bool,
    subscriptions: HashSet<String>,
    last_seen: HashMap<String, u64>,
    /// Live messages held back while a channel replays.
    replaying: HashMap<String, Vec<Arc<BusPayload>>>,
    /// Highest index already covered by replay, per channel.
    replayed_up_to: HashMap<String, u64>,
    before_id: VecDeque<BridgeAction>,
    before_identity: VecDeque<PendingAction>,
    outbox: VecDeque<String>,
}

impl Connection {
    /// Creates a connection and requests its id.
    ///
    /// Returns the connection and the receiver of its mailbox; every event
    /// read from it must be passed to [`Connection::handle_event`].
    #[must_use]
    pub fn new(
        ctx: Arc<GatewayContext>,
        info: UpgradeInfo,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (handle, events) = ConnectionHandle::new(ConnectionKey::next());
        let before_id = info
            .fields()
            .into_iter()
            .map(|(key, value)| BridgeAction::AddField { key, value })
            .collect();

        let allocator = Arc::clone(&ctx.allocator);
        let mailbox = handle.clone();
        tokio::spawn(async move {
            let event = match allocator.allocate().await {
                Ok(raw) => ConnectionEvent::IdAssigned(ConnectionId::new(raw)),
                Err(err) => ConnectionEvent::IdAllocationFailed(err.to_string()),
            };
            mailbox.notify(event);
        });

        let connection = Self {
            ctx,
            handle,
            info,
            id: None,
            identity: Identity::Unresolved,
            destroyed: false,
            subscriptions: HashSet::new(),
            last_seen: HashMap::new(),
            replaying: HashMap::new(),
            replayed_up_to: HashMap::new(),
            before_id,
            before_identity: VecDeque::new(),
            outbox: VecDeque::new(),
        };
        (connection, events)
    }

    /// Local key of the connection.
    #[must_use]
    pub const fn key(&self) -> ConnectionKey {
        self.handle.key()
    }

    /// Allocated id, once known.
    #[must_use]
    pub const fn id(&self) -> Option<ConnectionId> {
        self.id
    }

    /// Current identity.
    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.destroyed {
            ConnectionState::Destroyed
        } else if !self.identity.is_resolved() {
            ConnectionState::Unidentified
        } else if self.subscriptions.is_empty() {
            ConnectionState::Identified
        } else {
            ConnectionState::Active
        }
    }

    /// Returns `true` once torn down.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Frames queued for the client since the last call, in order.
    pub fn take_outbox(&mut self) -> Vec<String> {
        self.outbox.drain(..).collect()
    }

    /// Handles one line received from the client.
    pub fn handle_line(&mut self, line: &str) {
        if self.destroyed {
            return;
        }
        match ClientCommand::parse(line) {
            Ok(ClientCommand::Subscribe(channel)) => self.request_permission_when_identified(channel),
            Ok(ClientCommand::Unsubscribe(channel)) => self.unsubscribe(&channel),
            Ok(ClientCommand::Resubscribe { index, channel }) => {
                self.last_seen.insert(channel.clone(), index);
                self.request_permission_when_identified(channel);
            }
            Err(err) => {
                tracing::warn!(
                    connection = %self.key(),
                    connection_id = ?self.id,
                    ip = ?self.info.ip,
                    payload = line,
                    error = %err,
                    "invalid client command"
                );
            }
        }
    }

    /// Handles one mailbox event. Events reaching a torn-down connection
    /// are ignored.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        if self.destroyed {
            return;
        }
        match event {
            ConnectionEvent::Deliver { channel, payload } => self.deliver(&channel, payload),
            ConnectionEvent::IdAssigned(id) => self.on_id_assigned(id),
            ConnectionEvent::IdAllocationFailed(reason) => {
                let err = GatewayError::Internal(format!("id allocation failed: {reason}"));
                tracing::error!(connection = %self.key(), error = %err, "connection has no id");
                self.teardown();
            }
            ConnectionEvent::IdentityResolved(user_id) => self.on_identity_lookup(user_id),
            ConnectionEvent::PermissionResolved { channel, granted } => {
                self.on_permission(channel, granted);
            }
            ConnectionEvent::ReplayLoaded { channel, entries } => {
                self.on_replay_loaded(&channel, &entries);
            }
            ConnectionEvent::ReplayFailed { channel } => self.on_replay_loaded(&channel, &[]),
            ConnectionEvent::Directive(command) => self.send(protocol::command(&command)),
        }
    }

    /// Sends the heartbeat literal.
    pub fn heartbeat(&mut self) {
        let message = self.ctx.heartbeat.message.clone();
        self.send(message);
    }

    /// Releases everything the connection holds. Safe to call repeatedly.
    ///
    /// Frames queued before teardown (a fatal error, typically) stay in the
    /// outbox so the caller can still flush them.
    pub fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let key = self.key();
        self.ctx.tracker.revoke(key);
        if let Some(id) = self.id {
            self.ctx.bridge.destroyed(id, self.identity);
        }
        self.ctx.dispatcher.unsubscribe_from_all(key);
        if let Some(id) = self.id {
            self.ctx.registry.remove(id);
        }
        self.subscriptions.clear();
        self.last_seen.clear();
        self.replaying.clear();
        self.replayed_up_to.clear();
        self.before_id.clear();
        self.before_identity.clear();
        tracing::debug!(connection = %key, connection_id = ?self.id, "connection destroyed");
    }

    fn send(&mut self, frame: String) {
        if !self.destroyed {
            self.outbox.push_back(frame);
        }
    }

    fn deliver(&mut self, channel: &str, payload: Arc<BusPayload>) {
        if !self.subscriptions.contains(channel) {
            return;
        }
        if let Some(held) = self.replaying.get_mut(channel) {
            held.push(payload);
            return;
        }
        if let (Some(index), Some(&covered)) = (payload.index(), self.replayed_up_to.get(channel))
            && index <= covered
        {
            tracing::trace!(channel, index, "dropping live message already replayed");
            return;
        }
        self.send(protocol::forward(channel, &payload));
    }

    fn unsubscribe(&mut self, channel: &str) {
        self.ctx.dispatcher.unsubscribe(channel, self.key());
        self.subscriptions.remove(channel);
        self.replaying.remove(channel);
        self.replayed_up_to.remove(channel);
    }

    fn on_id_assigned(&mut self, id: ConnectionId) {
        if let Some(current) = self.id {
            tracing::error!(connection_id = %current, ignored = %id, "connection id assigned twice");
            return;
        }
        self.id = Some(id);
        if !self.ctx.registry.insert(id, self.handle.clone()) {
            tracing::error!(connection_id = %id, "connection id already registered");
        }
        self.ctx.bridge.connection_created(id);
        while let Some(action) = self.before_id.pop_front() {
            match action {
                BridgeAction::AddField { key, value } => self.ctx.bridge.add_field(id, key, value),
            }
        }
        self.identify();
    }

    fn identify(&mut self) {
        let mut cookies = self.info.cookies();
        let Some(session) = cookies.remove(&self.ctx.access.session_cookie) else {
            self.resolve(Identity::Guest);
            return;
        };
        if self.ctx.access.csrf_required && !cookies.contains_key(&self.ctx.access.csrf_cookie) {
            self.decline("Missing anti-forgery token");
            return;
        }

        self.ctx.tracker.register_identification(&self.handle);
        let oracle = Arc::clone(&self.ctx.oracle);
        let tracker = Arc::clone(&self.ctx.tracker);
        let key = self.key();
        tokio::spawn(async move {
            let user_id = oracle.identify(&session).await.unwrap_or_else(|err| {
                tracing::error!(connection = %key, error = %err, "identity lookup failed");
                None
            });
            tracker.complete_identification(key, user_id);
        });
    }

    fn on_identity_lookup(&mut self, user_id: Option<u64>) {
        match user_id {
            Some(user_id) => self.resolve(Identity::from_lookup(user_id)),
            None if self.ctx.access.guests_enabled => self.resolve(Identity::Guest),
            None => self.decline("Invalid session"),
        }
    }

    fn resolve(&mut self, identity: Identity) {
        let Some(id) = self.id else {
            tracing::error!(connection = %self.key(), "identity resolved before id assignment");
            return;
        };
        if identity.is_guest()
            && let Some(limit) = self.ctx.access.max_guests
        {
            if !self.ctx.registry.try_admit_guest(id, limit) {
                self.decline("Guest connection limit reached");
                return;
            }
        } else {
            self.ctx.registry.set_identity(id, identity);
        }

        self.identity = identity;
        self.ctx.bridge.identification_resolved(id, identity);
        while let Some(action) = self.before_identity.pop_front() {
            match action {
                PendingAction::RequestPermission(channel) => self.request_permission(channel),
            }
        }
    }

    fn decline(&mut self, reason: &str) {
        let err = GatewayError::IdentityDecline(reason.to_string());
        tracing::warn!(connection = %self.key(), connection_id = ?self.id, ip = ?self.info.ip, error = %err, "declining connection");
        self.send(protocol::decline(reason));
        self.teardown();
    }

    fn request_permission_when_identified(&mut self, channel: String) {
        if self.identity.is_resolved() {
            self.request_permission(channel);
        } else {
            self.before_identity.push_back(PendingAction::RequestPermission(channel));
        }
    }

    fn request_permission(&mut self, channel: String) {
        self.ctx.tracker.register_permission(&self.handle, &channel);
        let oracle = Arc::clone(&self.ctx.oracle);
        let tracker = Arc::clone(&self.ctx.tracker);
        let key = self.key();
        let identity = self.identity;
        tokio::spawn(async move {
            let granted = oracle
                .check_subscription(identity, &channel)
                .await
                .unwrap_or_else(|err| {
                    tracing::error!(connection = %key, channel = %channel, error = %err, "permission check failed");
                    false
                });
            tracker.complete_permission(key, &channel, granted);
        });
    }

    fn on_permission(&mut self, channel: String, granted: bool) {
        if !granted {
            self.last_seen.remove(&channel);
            self.send(protocol::invalid_subscription(&channel, self.identity));
            return;
        }
        let Some(id) = self.id else {
            tracing::error!(connection = %self.key(), channel = %channel, "permission granted before id assignment");
            return;
        };

        self.ctx.dispatcher.subscribe(&channel, &self.handle);
        self.ctx.bridge.subscribed(id, self.identity, &channel);
        self.subscriptions.insert(channel.clone());
        self.send(protocol::subscribed(&channel));

        if let Some(index) = self.last_seen.remove(&channel) {
            self.start_replay(channel, index);
        }
    }

    fn start_replay(&mut self, channel: String, after: u64) {
        self.replaying.entry(channel.clone()).or_default();
        // The client already holds everything up to `after`.
        let covered = self.replayed_up_to.entry(channel.clone()).or_insert(after);
        *covered = (*covered).max(after);
        let cache = Arc::clone(&self.ctx.cache);
        let mailbox = self.handle.clone();
        tokio::spawn(async move {
            let last = match cache.last_index(&channel).await {
                Ok(last) => last.unwrap_or(0),
                Err(err) => {
                    tracing::error!(channel = %channel, error = %err, "failed to read stream index counter");
                    mailbox.notify(ConnectionEvent::ReplayFailed { channel });
                    return;
                }
            };
            let mut entries = Vec::new();
            for index in after.saturating_add(1)..=last {
                let payload = cache.message(&channel, index).await.unwrap_or_else(|err| {
                    tracing::error!(channel = %channel, index, error = %err, "failed to read stream message");
                    None
                });
                entries.push(ReplayEntry { index, payload });
            }
            mailbox.notify(ConnectionEvent::ReplayLoaded { channel, entries });
        });
    }

    fn on_replay_loaded(&mut self, channel: &str, entries: &[ReplayEntry]) {
        let Some(held) = self.replaying.remove(channel) else {
            return;
        };
        for entry in entries {
            match &entry.payload {
                Some(content) => self.send(protocol::replayed(channel, entry.index, content)),
                None => self.send(protocol::not_found(channel, entry.index)),
            }
        }
        if let Some(last) = entries.iter().map(|e| e.index).max() {
            let covered = self.replayed_up_to.entry(channel.to_string()).or_insert(last);
            *covered = (*covered).max(last);
        }
        for payload in held {
            self.deliver(channel, payload);
        }
    }
}

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Feeds client text frames and mailbox events to the [`Connection`].
/// - Sends whatever it queued, resetting the heartbeat after each send.
/// - Tears down on close, on transport error, and on send failure.
pub async fn run_connection(socket: WebSocket, ctx: Arc<GatewayContext>, info: UpgradeInfo) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut timer = HeartbeatTimer::new(ctx.heartbeat.clone());
    let (mut connection, mut events) = Connection::new(ctx, info);

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => connection.handle_line(&text),
                Some(Ok(Message::Close(_))) | None => connection.teardown(),
                Some(Err(err)) => {
                    let err = GatewayError::Transport(err.to_string());
                    tracing::warn!(connection = %connection.key(), error = %err, "websocket error");
                    connection.teardown();
                }
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Some(event) => connection.handle_event(event),
                None => connection.teardown(),
            },
            () = timer.expired() => {
                connection.heartbeat();
                timer.rearm();
            }
        }

        for frame in connection.take_outbox() {
            if let Err(err) = ws_tx.send(Message::text(frame)).await {
                let err = GatewayError::Transport(err.to_string());
                tracing::debug!(connection = %connection.key(), error = %err, "send on closed websocket");
                connection.teardown();
                break;
            }
            timer.rearm();
        }

        if connection.is_destroyed() {
            let _ = ws_tx.close().await;
            break;
        }
    }

    tracing::debug!(connection = %connection.key(), "ws connection closed");
}
