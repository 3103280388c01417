//! Registrations of in-flight permission and identification requests.
//!
//! Before a connection asks the oracle anything it registers the request
//! here, keyed by `(connection, channel)` for subscriptions or by the
//! connection alone for identification. The oracle's answer is routed back
//! through [`PermissionTracker::complete_permission`] or
//! [`PermissionTracker::complete_identification`], which forward it only if
//! the matching registration still exists. Teardown calls
//! [`PermissionTracker::revoke`], so an answer arriving afterwards finds
//! nothing and is dropped.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{ConnectionEvent, ConnectionHandle, ConnectionKey};

#[derive(Debug)]
struct Registrations {
    handle: ConnectionHandle,
    /// Outstanding subscription requests per channel.
    permissions: HashMap<String, usize>,
    identification: bool,
}

impl Registrations {
    fn is_idle(&self) -> bool {
        self.permissions.is_empty() && !self.identification
    }
}

/// Tracker matching asynchronous oracle answers to live requests.
#[derive(Debug, Default)]
pub struct PermissionTracker {
    pending: Mutex<HashMap<ConnectionKey, Registrations>>,
}

impl PermissionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription permission request.
    pub fn register_permission(&self, handle: &ConnectionHandle, channel: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = pending
            .entry(handle.key())
            .or_insert_with(|| Registrations {
                handle: handle.clone(),
                permissions: HashMap::new(),
                identification: false,
            });
        *entry.permissions.entry(channel.to_string()).or_insert(0) += 1;
    }

    /// Registers an identification request.
    pub fn register_identification(&self, handle: &ConnectionHandle) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .entry(handle.key())
            .or_insert_with(|| Registrations {
                handle: handle.clone(),
                permissions: HashMap::new(),
                identification: false,
            })
            .identification = true;
    }

    /// Routes a permission answer to its connection.
    ///
    /// Returns `false` if no matching registration exists (the connection
    /// was torn down, or never asked).
    pub fn complete_permission(&self, key: ConnectionKey, channel: &str, granted: bool) -> bool {
        let handle = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = pending.get_mut(&key) else {
                tracing::debug!(connection = %key, channel, "permission answer for revoked registration");
                return false;
            };
            let Some(count) = entry.permissions.get_mut(channel) else {
                tracing::debug!(connection = %key, channel, "permission answer without request");
                return false;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.permissions.remove(channel);
            }
            let handle = entry.handle.clone();
            if entry.is_idle() {
                pending.remove(&key);
            }
            handle
        };
        handle.notify(ConnectionEvent::PermissionResolved {
            channel: channel.to_string(),
            granted,
        })
    }

    /// Routes an identification answer to its connection.
    ///
    /// Returns `false` if no identification is registered for `key`.
    pub fn complete_identification(&self, key: ConnectionKey, user_id: Option<u64>) -> bool {
        let handle = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = pending.get_mut(&key) else {
                tracing::debug!(connection = %key, "identification answer for revoked registration");
                return false;
            };
            if !entry.identification {
                return false;
            }
            entry.identification = false;
            let handle = entry.handle.clone();
            if entry.is_idle() {
                pending.remove(&key);
            }
            handle
        };
        handle.notify(ConnectionEvent::IdentityResolved(user_id))
    }

    /// Drops every registration of a connection.
    pub fn revoke(&self, key: ConnectionKey) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    /// Returns `true` if the connection has any outstanding request.
    #[must_use]
    pub fn has_pending(&self, key: ConnectionKey) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permission_answer_is_forwarded_once() {
        let tracker = PermissionTracker::new();
        let (handle, mut rx) = ConnectionHandle::new(ConnectionKey::next());
        tracker.register_permission(&handle, "news");

        assert!(tracker.complete_permission(handle.key(), "news", true));
        let Some(ConnectionEvent::PermissionResolved { channel, granted }) = rx.recv().await else {
            panic!("expected permission event");
        };
        assert_eq!(channel, "news");
        assert!(granted);

        assert!(!tracker.complete_permission(handle.key(), "news", true));
        assert!(!tracker.has_pending(handle.key()));
    }

    #[test]
    fn revoked_registration_swallows_late_answers() {
        let tracker = PermissionTracker::new();
        let (handle, mut rx) = ConnectionHandle::new(ConnectionKey::next());
        tracker.register_permission(&handle, "news");
        tracker.register_identification(&handle);

        tracker.revoke(handle.key());

        assert!(!tracker.complete_permission(handle.key(), "news", true));
        assert!(!tracker.complete_identification(handle.key(), Some(3)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn repeated_requests_for_one_channel_each_get_an_answer() {
        let tracker = PermissionTracker::new();
        let (handle, _rx) = ConnectionHandle::new(ConnectionKey::next());
        tracker.register_permission(&handle, "news");
        tracker.register_permission(&handle, "news");

        assert!(tracker.complete_permission(handle.key(), "news", false));
        assert!(tracker.has_pending(handle.key()));
        assert!(tracker.complete_permission(handle.key(), "news", false));
        assert!(!tracker.has_pending(handle.key()));
    }

    #[tokio::test]
    async fn identification_answer_is_forwarded() {
        let tracker = PermissionTracker::new();
        let (handle, mut rx) = ConnectionHandle::new(ConnectionKey::next());
        tracker.register_identification(&handle);

        assert!(tracker.complete_identification(handle.key(), None));
        let Some(ConnectionEvent::IdentityResolved(user)) = rx.recv().await else {
            panic!("expected identification event");
        };
        assert_eq!(user, None);
    }
}
