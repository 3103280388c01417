//! Synchronous core of the metadata bridge.
//!
//! [`MetadataBridge`] holds the replica and the emission pipeline but does
//! no I/O. Every mutating operation updates the replica and emits a matching
//! [`BridgeMessage`]. Emissions made before the instance id is known wait in
//! a FIFO queue; once [`MetadataBridge::assign_id`] runs they are stamped and
//! moved, in order, to the outbox the bridge task publishes from.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;

use super::messages::{BridgeMessage, ControlCommand, Stamped};
use super::replica::MetadataReplica;
use crate::domain::{ConnectionId, Identity};
use crate::error::GatewayError;

/// Replica plus emission pipeline of one bridge instance.
#[derive(Debug)]
pub struct MetadataBridge {
    instance_id: Option<u64>,
    keep_alive: Option<Duration>,
    replica: MetadataReplica,
    pending: VecDeque<BridgeMessage>,
    outbox: VecDeque<String>,
    activity: bool,
}

impl MetadataBridge {
    /// Creates a bridge and emits its start-up snapshot.
    #[must_use]
    pub fn new(keep_alive: Option<Duration>) -> Self {
        let mut bridge = Self {
            instance_id: None,
            keep_alive,
            replica: MetadataReplica::new(),
            pending: VecDeque::new(),
            outbox: VecDeque::new(),
            activity: false,
        };
        bridge.sync_with_state();
        bridge
    }

    /// Instance id, once assigned.
    #[must_use]
    pub const fn instance_id(&self) -> Option<u64> {
        self.instance_id
    }

    /// Local replica.
    #[must_use]
    pub const fn replica(&self) -> &MetadataReplica {
        &self.replica
    }

    /// Sets the instance id and releases the pending emissions in order.
    /// A second assignment is ignored.
    pub fn assign_id(&mut self, id: u64) {
        if let Some(current) = self.instance_id {
            tracing::error!(current, ignored = id, "bridge id assigned twice");
            return;
        }
        self.instance_id = Some(id);
        tracing::info!(bridge_id = id, pending = self.pending.len(), "metadata bridge identified");
        while let Some(message) = self.pending.pop_front() {
            self.publish(id, message);
        }
    }

    /// A connection received its id.
    pub fn connection_created(&mut self, id: ConnectionId) {
        let result = self.replica.create(id);
        if report(self.instance_id, result) {
            self.emit(BridgeMessage::UserConnectionNewEvent { connection_id: id });
        }
    }

    /// Records an attribute; `None` is recorded as `null`.
    pub fn add_field(&mut self, id: ConnectionId, key: &str, value: Option<Value>) {
        let value = value.unwrap_or(Value::Null);
        let result = self.replica.add_field(id, key, value.clone());
        if report(self.instance_id, result) {
            self.emit(BridgeMessage::UserConnectionAddField {
                connection_id: id,
                key: key.to_string(),
                value,
            });
        }
    }

    /// A connection's identity was resolved.
    pub fn identification_resolved(&mut self, id: ConnectionId, identity: Identity) {
        let result = self.replica.identify(id, identity);
        if report(self.instance_id, result) {
            self.emit(BridgeMessage::UserConnectionIdentificationEvent {
                connection_id: id,
                user_id: identity,
            });
        }
    }

    /// A connection was granted `channel`.
    pub fn subscribed(&mut self, id: ConnectionId, identity: Identity, channel: &str) {
        let result = self.replica.subscribe(id, channel);
        if report(self.instance_id, result) {
            self.emit(BridgeMessage::UserConnectionSubscribe {
                connection_id: id,
                user_id: identity,
                channel: channel.to_string(),
            });
        }
    }

    /// A connection went away; its record is dropped.
    pub fn destroyed(&mut self, id: ConnectionId, identity: Identity) {
        let result = self.replica.remove(id).map(|_| ());
        if report(self.instance_id, result) {
            self.emit(BridgeMessage::UserConnectionDestroyEvent {
                connection_id: id,
                user_id: identity,
            });
        }
    }

    /// Emits the whole replica as one `syncWithState`.
    pub fn sync_with_state(&mut self) {
        let commands = self.replica.snapshot();
        self.emit(BridgeMessage::SyncWithState { commands });
    }

    /// Emits a keep-alive carrying the configured expiry hint.
    pub fn keep_alive(&mut self) {
        let timeout = self
            .keep_alive
            .map(|period| u64::try_from(period.as_millis()).unwrap_or(u64::MAX));
        self.emit(BridgeMessage::KeepAlive { timeout });
    }

    /// Handles one raw inbound control payload. Malformed payloads are
    /// logged and dropped; commands addressed to another instance are
    /// ignored.
    pub fn handle_control(&mut self, raw: &str) {
        let command = match ControlCommand::parse(raw) {
            Ok(command) => command,
            Err(err) => {
                tracing::error!(payload = raw, error = %err, "bad bridge control message");
                return;
            }
        };
        if !command.applies_to(self.instance_id) {
            tracing::trace!(?command, "control message for another instance");
            return;
        }
        match command {
            ControlCommand::RequestSyncAll | ControlCommand::RequestSync { .. } => {
                self.sync_with_state();
            }
            ControlCommand::CheckAliveAll | ControlCommand::CheckAlive { .. } => self.keep_alive(),
        }
    }

    /// Serialized messages ready to publish, in emission order.
    pub fn drain_outbox(&mut self) -> Vec<String> {
        self.outbox.drain(..).collect()
    }

    /// Returns `true` (once) if anything was emitted since the last call.
    pub fn take_activity(&mut self) -> bool {
        std::mem::take(&mut self.activity)
    }

    fn emit(&mut self, message: BridgeMessage) {
        self.activity = true;
        match self.instance_id {
            Some(id) => self.publish(id, message),
            None => self.pending.push_back(message),
        }
    }

    fn publish(&mut self, id: u64, message: BridgeMessage) {
        match serde_json::to_string(&Stamped { id, message }) {
            Ok(payload) => self.outbox.push_back(payload),
            Err(err) => tracing::error!(error = %err, "failed to serialize bridge message"),
        }
    }

}

/// Logs a replica violation as critical. Returns whether the event may be
/// emitted.
fn report(bridge_id: Option<u64>, result: Result<(), GatewayError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(critical = true, bridge_id = ?bridge_id, error = %err, "metadata replica out of sync");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn decode(payloads: &[String]) -> Vec<Stamped> {
        payloads
            .iter()
            .map(|p| {
                let Ok(stamped) = serde_json::from_str::<Stamped>(p) else {
                    panic!("undecodable bridge payload {p}");
                };
                stamped
            })
            .collect()
    }

    fn kinds(payloads: &[String]) -> Vec<String> {
        payloads
            .iter()
            .filter_map(|p| serde_json::from_str::<Value>(p).ok())
            .filter_map(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    #[test]
    fn emissions_wait_for_instance_id() {
        let mut bridge = MetadataBridge::new(None);
        let id = ConnectionId::new(1);
        bridge.connection_created(id);
        bridge.add_field(id, "IP", None);
        assert!(bridge.drain_outbox().is_empty());

        bridge.assign_id(7);
        let out = bridge.drain_outbox();
        assert_eq!(
            kinds(&out),
            vec!["syncWithState", "userConnectionNewEvent", "userConnectionAddField"]
        );
        assert!(decode(&out).iter().all(|s| s.id == 7));

        bridge.destroyed(id, Identity::Unresolved);
        assert_eq!(kinds(&bridge.drain_outbox()), vec!["userConnectionDestroyEvent"]);
    }

    #[test]
    fn lifecycle_updates_replica_once() {
        let mut bridge = MetadataBridge::new(None);
        bridge.assign_id(1);
        bridge.drain_outbox();
        let id = ConnectionId::new(8);
        bridge.connection_created(id);
        bridge.connection_created(id);
        bridge.identification_resolved(id, Identity::User(12));
        bridge.subscribed(id, Identity::User(12), "news");
        bridge.subscribed(id, Identity::User(12), "news");

        assert_eq!(
            kinds(&bridge.drain_outbox()),
            vec![
                "userConnectionNewEvent",
                "userConnectionIdentificationEvent",
                "userConnectionSubscribe",
                "userConnectionSubscribe",
            ]
        );
        let Some(record) = bridge.replica().get(id) else {
            panic!("record should exist");
        };
        assert_eq!(record.identity, Identity::User(12));
        assert_eq!(record.channels, vec!["news".to_string()]);
        assert_eq!(bridge.replica().len(), 1);
    }

    #[test]
    fn missing_field_value_is_null() {
        let mut bridge = MetadataBridge::new(None);
        bridge.assign_id(1);
        bridge.drain_outbox();
        let id = ConnectionId::new(3);
        bridge.connection_created(id);
        bridge.add_field(id, "userAgent", None);
        let out = decode(&bridge.drain_outbox());
        assert_eq!(
            out.get(1).map(|s| &s.message),
            Some(&BridgeMessage::UserConnectionAddField {
                connection_id: id,
                key: "userAgent".to_string(),
                value: Value::Null,
            })
        );
    }

    #[test]
    fn targeted_sync_for_other_instance_is_silent() {
        let mut bridge = MetadataBridge::new(Some(Duration::from_secs(30)));
        bridge.assign_id(4);
        bridge.drain_outbox();

        bridge.handle_control(r#"{"type":"requestSync","id":5}"#);
        bridge.handle_control(r#"{"type":"checkAlive","id":5}"#);
        assert!(bridge.drain_outbox().is_empty());

        bridge.handle_control(r#"{"type":"requestSync","id":4}"#);
        bridge.handle_control(r#"{"type":"checkAliveAll"}"#);
        let out = decode(&bridge.drain_outbox());
        assert!(matches!(
            out.first().map(|s| &s.message),
            Some(BridgeMessage::SyncWithState { .. })
        ));
        assert_eq!(
            out.get(1).map(|s| &s.message),
            Some(&BridgeMessage::KeepAlive {
                timeout: Some(30_000)
            })
        );
    }

    #[test]
    fn malformed_control_is_dropped() {
        let mut bridge = MetadataBridge::new(None);
        bridge.assign_id(1);
        bridge.drain_outbox();
        bridge.take_activity();
        for raw in ["{", r#"{"id":1}"#, r#"{"type":"reboot"}"#, r#"{"type":"checkAlive"}"#] {
            bridge.handle_control(raw);
        }
        assert!(bridge.drain_outbox().is_empty());
        assert!(!bridge.take_activity());
    }

    #[test]
    fn sync_reconstructs_replica() {
        let mut bridge = MetadataBridge::new(None);
        bridge.assign_id(2);
        let a = ConnectionId::new(10);
        let b = ConnectionId::new(11);
        bridge.connection_created(a);
        bridge.add_field(a, "IP", Some(Value::from("1.2.3.4")));
        bridge.identification_resolved(a, Identity::User(5));
        bridge.subscribed(a, Identity::User(5), "news");
        bridge.connection_created(b);
        bridge.identification_resolved(b, Identity::Guest);
        bridge.drain_outbox();

        bridge.handle_control(r#"{"type":"requestSyncAll"}"#);
        let out = decode(&bridge.drain_outbox());
        let Some(sync) = out.first() else {
            panic!("expected a snapshot");
        };
        let mut receiver = MetadataReplica::new();
        assert!(receiver.apply(&sync.message).is_ok());
        assert_eq!(&receiver, bridge.replica());
    }

    #[test]
    fn operations_on_unknown_connection_emit_nothing() {
        let mut bridge = MetadataBridge::new(None);
        bridge.assign_id(1);
        bridge.drain_outbox();
        let ghost = ConnectionId::new(99);
        bridge.identification_resolved(ghost, Identity::Guest);
        bridge.subscribed(ghost, Identity::Guest, "news");
        bridge.destroyed(ghost, Identity::Guest);
        assert!(bridge.drain_outbox().is_empty());
    }

    #[test]
    fn declined_guest_leaves_no_record() {
        let mut bridge = MetadataBridge::new(None);
        bridge.assign_id(1);
        let id = ConnectionId::new(3);
        bridge.connection_created(id);
        bridge.add_field(id, "IP", None);
        bridge.destroyed(id, Identity::Unresolved);
        assert!(bridge.replica().is_empty());

        bridge.drain_outbox();
        bridge.sync_with_state();
        let out = decode(&bridge.drain_outbox());
        assert_eq!(
            out.first().map(|s| &s.message),
            Some(&BridgeMessage::SyncWithState { commands: vec![] })
        );
    }
}
