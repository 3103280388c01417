//! Channel fan-out dispatcher.
//!
//! [`Dispatcher`] owns the upstream subscription set of the process. It
//! keeps a [`BiIndex`] from channels to subscribed connections (and back)
//! and issues an upstream subscribe when a channel gains its first
//! subscriber and an upstream unsubscribe when it loses its last one, so an
//! upstream subscription is active exactly while its subscriber set is
//! non-empty.
//!
//! Fan-out copies the subscriber set of a channel before delivering:
//! delivery may end up tearing a connection down, which mutates the live
//! set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::message::{BusPayload, Classified, RawMessagePolicy, classify};
use crate::adapters::UpstreamLink;
use crate::domain::{BiIndex, ConnectionHandle, ConnectionKey};

/// What happened to one inbound bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to this many subscribers (possibly zero).
    Delivered(usize),
    /// Dropped silently by policy.
    Suppressed,
    /// Dropped and logged as an invalid bus message.
    Rejected,
}

#[derive(Debug, Default)]
struct DispatchState {
    subscriptions: BiIndex<String, ConnectionKey>,
    handles: HashMap<ConnectionKey, ConnectionHandle>,
}

/// Fan-out dispatcher shared by every connection of the process.
#[derive(Debug)]
pub struct Dispatcher {
    upstream: Arc<dyn UpstreamLink>,
    raw_policy: RawMessagePolicy,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    /// Creates a dispatcher issuing subscriptions through `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamLink>, raw_policy: RawMessagePolicy) -> Self {
        Self {
            upstream,
            raw_policy,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Subscribes a connection to `channel`.
    pub fn subscribe(&self, channel: &str, handle: &ConnectionHandle) {
        let mut state = self.lock();
        let insertion = state.subscriptions.insert(channel.to_string(), handle.key());
        if insertion.right_created {
            state.handles.insert(handle.key(), handle.clone());
        }
        if insertion.left_created {
            tracing::debug!(channel, "first subscriber, subscribing upstream");
            self.upstream.subscribe(channel);
        }
    }

    /// Unsubscribes a connection from `channel`.
    ///
    /// Returns `false` (and logs an error) if the connection was not
    /// subscribed to it.
    pub fn unsubscribe(&self, channel: &str, key: ConnectionKey) -> bool {
        let mut state = self.lock();
        self.detach(&mut state, channel, key)
    }

    /// Unsubscribes a connection from every channel it holds.
    pub fn unsubscribe_from_all(&self, key: ConnectionKey) {
        let mut state = self.lock();
        for channel in state.subscriptions.lefts_of(&key) {
            self.detach(&mut state, &channel, key);
        }
    }

    /// Parses one inbound bus message and fans it out.
    pub fn handle_bus_message(&self, channel: &str, message: &str) -> DispatchOutcome {
        let classified = match classify(channel, message) {
            Ok(classified) => classified,
            Err(err) => {
                tracing::error!(channel, payload = message, error = %err, "dropping bus message");
                return DispatchOutcome::Rejected;
            }
        };
        let payload = match classified {
            Classified::Known(payload) => payload,
            Classified::Raw(raw) => match self.raw_policy {
                RawMessagePolicy::Error => {
                    tracing::error!(channel, payload = %raw, "invalid stream message type");
                    return DispatchOutcome::Rejected;
                }
                RawMessagePolicy::SuppressError => return DispatchOutcome::Suppressed,
                RawMessagePolicy::TreatAsVanilla => BusPayload::Vanilla(raw),
                RawMessagePolicy::PassRaw => BusPayload::Raw(raw),
            },
        };
        DispatchOutcome::Delivered(self.dispatch(channel, payload))
    }

    /// Delivers `payload` to every current subscriber of `channel`.
    /// Returns the number of subscribers it was handed to.
    pub fn dispatch(&self, channel: &str, payload: BusPayload) -> usize {
        let subscribers: Vec<ConnectionHandle> = {
            let state = self.lock();
            state
                .subscriptions
                .rights_of(channel)
                .iter()
                .filter_map(|key| state.handles.get(key).cloned())
                .collect()
        };
        let payload = Arc::new(payload);
        let mut delivered = 0;
        for subscriber in &subscribers {
            if subscriber.deliver(channel, Arc::clone(&payload)) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Returns `true` if the connection is subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str, key: ConnectionKey) -> bool {
        self.lock().subscriptions.contains(channel, &key)
    }

    /// Number of subscribers of `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().subscriptions.rights_of(channel).len()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.lock().subscriptions.left_len()
    }

    /// Channels the connection is subscribed to.
    #[must_use]
    pub fn channels_of(&self, key: ConnectionKey) -> Vec<String> {
        self.lock().subscriptions.lefts_of(&key)
    }

    fn detach(&self, state: &mut DispatchState, channel: &str, key: ConnectionKey) -> bool {
        let removal = state.subscriptions.remove(channel, &key);
        if !removal.removed {
            tracing::error!(channel, connection = %key, "unsubscribe for a pair that is not subscribed");
            return false;
        }
        if removal.left_emptied {
            tracing::debug!(channel, "no subscribers left, unsubscribing upstream");
            self.upstream.unsubscribe(channel);
        }
        if removal.right_emptied {
            state.handles.remove(&key);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryUpstream, UpstreamCommand};
    use crate::domain::ConnectionEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn dispatcher(policy: RawMessagePolicy) -> (Dispatcher, Arc<MemoryUpstream>) {
        let upstream = Arc::new(MemoryUpstream::new());
        let link: Arc<dyn UpstreamLink> = Arc::clone(&upstream) as Arc<dyn UpstreamLink>;
        (Dispatcher::new(link, policy), upstream)
    }

    fn connection() -> (ConnectionHandle, UnboundedReceiver<ConnectionEvent>) {
        ConnectionHandle::new(ConnectionKey::next())
    }

    fn next_delivery(rx: &mut UnboundedReceiver<ConnectionEvent>) -> Option<String> {
        match rx.try_recv() {
            Ok(ConnectionEvent::Deliver { payload, .. }) => Some(payload.to_string()),
            _ => None,
        }
    }

    #[test]
    fn upstream_subscription_follows_subscriber_set() {
        let (dispatcher, upstream) = dispatcher(RawMessagePolicy::Error);
        let (a, _rx_a) = connection();
        let (b, _rx_b) = connection();

        dispatcher.subscribe("news", &a);
        dispatcher.subscribe("news", &b);
        assert!(upstream.is_active("news"));
        assert_eq!(dispatcher.subscriber_count("news"), 2);

        assert!(dispatcher.unsubscribe("news", a.key()));
        assert!(upstream.is_active("news"));

        assert!(dispatcher.unsubscribe("news", b.key()));
        assert!(!upstream.is_active("news"));
        assert_eq!(dispatcher.channel_count(), 0);
        assert_eq!(
            upstream.commands(),
            vec![
                UpstreamCommand::Subscribe("news".to_string()),
                UpstreamCommand::Unsubscribe("news".to_string()),
            ]
        );
    }

    #[test]
    fn unsubscribe_of_absent_pair_is_reported() {
        let (dispatcher, upstream) = dispatcher(RawMessagePolicy::Error);
        let (a, _rx) = connection();
        assert!(!dispatcher.unsubscribe("news", a.key()));
        assert!(upstream.commands().is_empty());
    }

    #[test]
    fn unsubscribe_from_all_releases_every_channel() {
        let (dispatcher, upstream) = dispatcher(RawMessagePolicy::Error);
        let (a, _rx_a) = connection();
        let (b, _rx_b) = connection();
        dispatcher.subscribe("news", &a);
        dispatcher.subscribe("sport", &a);
        dispatcher.subscribe("sport", &b);

        dispatcher.unsubscribe_from_all(a.key());
        assert!(dispatcher.channels_of(a.key()).is_empty());
        assert!(!upstream.is_active("news"));
        assert!(upstream.is_active("sport"));

        dispatcher.unsubscribe_from_all(a.key());
        assert_eq!(dispatcher.subscriber_count("sport"), 1);
    }

    #[test]
    fn fan_out_scenario_with_default_policy() {
        let (dispatcher, _upstream) = dispatcher(RawMessagePolicy::default());
        let (s, mut rx) = connection();
        dispatcher.subscribe("news", &s);

        assert_eq!(
            dispatcher.handle_bus_message("news", "i 5 hello"),
            DispatchOutcome::Delivered(1)
        );
        assert_eq!(next_delivery(&mut rx).as_deref(), Some("i 5 hello"));

        assert_eq!(
            dispatcher.handle_bus_message("news", "v hi"),
            DispatchOutcome::Delivered(1)
        );
        assert_eq!(next_delivery(&mut rx).as_deref(), Some("v hi"));

        assert_eq!(
            dispatcher.handle_bus_message("news", "x garbage"),
            DispatchOutcome::Rejected
        );
        assert_eq!(next_delivery(&mut rx), None);
    }

    #[test]
    fn raw_policies() {
        let (vanilla, _) = dispatcher(RawMessagePolicy::TreatAsVanilla);
        let (s, mut rx) = connection();
        vanilla.subscribe("news", &s);
        vanilla.handle_bus_message("news", "x garbage");
        assert_eq!(next_delivery(&mut rx).as_deref(), Some("v x garbage"));

        let (raw, _) = dispatcher(RawMessagePolicy::PassRaw);
        let (s, mut rx) = connection();
        raw.subscribe("news", &s);
        raw.handle_bus_message("news", "x garbage");
        assert_eq!(next_delivery(&mut rx).as_deref(), Some("x garbage"));

        let (quiet, _) = dispatcher(RawMessagePolicy::SuppressError);
        let (s, mut rx) = connection();
        quiet.subscribe("news", &s);
        assert_eq!(
            quiet.handle_bus_message("news", "x garbage"),
            DispatchOutcome::Suppressed
        );
        assert_eq!(next_delivery(&mut rx), None);
    }

    #[test]
    fn messages_on_other_channels_are_not_delivered() {
        let (dispatcher, _) = dispatcher(RawMessagePolicy::Error);
        let (s, mut rx) = connection();
        dispatcher.subscribe("news", &s);
        assert_eq!(
            dispatcher.handle_bus_message("sport", "v goal"),
            DispatchOutcome::Delivered(0)
        );
        assert_eq!(next_delivery(&mut rx), None);
    }

    #[test]
    fn closed_subscriber_does_not_disturb_others() {
        let (dispatcher, _) = dispatcher(RawMessagePolicy::Error);
        let (gone, gone_rx) = connection();
        let (live, mut live_rx) = connection();
        dispatcher.subscribe("news", &gone);
        dispatcher.subscribe("news", &live);
        drop(gone_rx);

        assert_eq!(
            dispatcher.handle_bus_message("news", "v hi"),
            DispatchOutcome::Delivered(1)
        );
        assert_eq!(next_delivery(&mut live_rx).as_deref(), Some("v hi"));
    }
}
