//! Mailbox handle through which other components talk to a connection.
//!
//! A connection runs as its own task and owns its state exclusively. The
//! dispatcher, the permission tracker, the registry and collaborator tasks
//! reach it only by posting a [`ConnectionEvent`] through a cloned
//! [`ConnectionHandle`]. Posting to a connection that is gone is a silent
//! no-op: the mailbox is closed and the event is dropped.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ConnectionId, ConnectionKey};
use crate::dispatch::BusPayload;

/// One looked-up replay slot: the stored payload, or `None` on a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    /// Stream index of the slot.
    pub index: u64,
    /// Stored content, `None` when the cache has no entry for `index`.
    pub payload: Option<String>,
}

/// Everything that can happen to a connection besides client input.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Fan-out delivery of a bus message on a subscribed channel.
    Deliver {
        /// Channel the message was published on.
        channel: String,
        /// Parsed payload, shared between all subscribers.
        payload: Arc<BusPayload>,
    },
    /// The allocator produced this connection's id.
    IdAssigned(ConnectionId),
    /// The allocator failed; the connection cannot continue.
    IdAllocationFailed(String),
    /// Identity lookup finished. `None` means the session was not found.
    IdentityResolved(Option<u64>),
    /// The oracle answered a subscription permission request.
    PermissionResolved {
        /// Channel the request was for.
        channel: String,
        /// Whether the subscription is allowed.
        granted: bool,
    },
    /// Replay lookups for a channel completed.
    ReplayLoaded {
        /// Channel being replayed.
        channel: String,
        /// Looked-up slots in ascending index order.
        entries: Vec<ReplayEntry>,
    },
    /// Replay could not be planned (index counter unavailable).
    ReplayFailed {
        /// Channel being replayed.
        channel: String,
    },
    /// Administrative directive to push as `c <command>`.
    Directive(String),
}

/// Cloneable sender side of a connection's mailbox.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    key: ConnectionKey,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionHandle {
    /// Creates a handle and the mailbox receiver it feeds.
    #[must_use]
    pub fn new(key: ConnectionKey) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { key, events }, rx)
    }

    /// Local key of the connection behind this handle.
    #[must_use]
    pub const fn key(&self) -> ConnectionKey {
        self.key
    }

    /// Posts an event. Returns `false` if the connection is gone.
    pub fn notify(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Delivers a fanned-out bus message.
    pub fn deliver(&self, channel: &str, payload: Arc<BusPayload>) -> bool {
        self.notify(ConnectionEvent::Deliver {
            channel: channel.to_string(),
            payload,
        })
    }

    /// Pushes an administrative directive.
    pub fn send_directive(&self, command: &str) -> bool {
        self.notify(ConnectionEvent::Directive(command.to_string()))
    }

    /// Returns `true` once the connection task has dropped its mailbox.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directive_reaches_mailbox() {
        let (handle, mut rx) = ConnectionHandle::new(ConnectionKey::next());
        assert!(handle.send_directive("refresh"));
        let Some(ConnectionEvent::Directive(cmd)) = rx.recv().await else {
            panic!("expected directive");
        };
        assert_eq!(cmd, "refresh");
    }

    #[test]
    fn notify_after_drop_reports_closed() {
        let (handle, rx) = ConnectionHandle::new(ConnectionKey::next());
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send_directive("refresh"));
    }
}
