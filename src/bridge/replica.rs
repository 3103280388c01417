//! Local replica of every live connection's metadata record.

use std::collections::BTreeMap;

use serde_json::Value;

use super::messages::BridgeMessage;
use crate::domain::{ConnectionId, Identity};
use crate::error::GatewayError;

/// Replicated description of one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    /// Resolved identity, [`Identity::Unresolved`] until identification.
    pub identity: Identity,
    /// Attributes in first-insertion order; re-adding a key replaces its
    /// value in place.
    pub fields: Vec<(String, Value)>,
    /// Granted channels in grant order, without duplicates.
    pub channels: Vec<String>,
}

impl MetadataRecord {
    /// Value of field `key`, if recorded.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn set_field(&mut self, key: String, value: Value) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    fn add_channel(&mut self, channel: String) {
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
    }
}

/// Records keyed by connection id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataReplica {
    records: BTreeMap<ConnectionId, MetadataRecord>,
}

impl MetadataReplica {
    /// Creates an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Consistency`] if the record already exists.
    pub fn create(&mut self, id: ConnectionId) -> Result<(), GatewayError> {
        if self.records.contains_key(&id) {
            return Err(GatewayError::Consistency(format!(
                "connection {id} created twice"
            )));
        }
        self.records.insert(id, MetadataRecord::default());
        Ok(())
    }

    /// Records field `key` on `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Consistency`] if `id` has no record.
    pub fn add_field(&mut self, id: ConnectionId, key: &str, value: Value) -> Result<(), GatewayError> {
        self.record_mut(id, "add field")?
            .set_field(key.to_string(), value);
        Ok(())
    }

    /// Records the identity of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Consistency`] if `id` has no record.
    pub fn identify(&mut self, id: ConnectionId, identity: Identity) -> Result<(), GatewayError> {
        self.record_mut(id, "identify")?.identity = identity;
        Ok(())
    }

    /// Records a granted subscription of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Consistency`] if `id` has no record.
    pub fn subscribe(&mut self, id: ConnectionId, channel: &str) -> Result<(), GatewayError> {
        self.record_mut(id, "subscribe")?
            .add_channel(channel.to_string());
        Ok(())
    }

    /// Drops the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Consistency`] if `id` has no record.
    pub fn remove(&mut self, id: ConnectionId) -> Result<MetadataRecord, GatewayError> {
        self.records.remove(&id).ok_or_else(|| missing(id, "destroy"))
    }

    /// Record of `id`, if live.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&MetadataRecord> {
        self.records.get(&id)
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The whole replica as an ordered command log.
    ///
    /// Per record, in id order: creation, identification (if resolved),
    /// each field, each subscription.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BridgeMessage> {
        let mut commands = Vec::new();
        for (&connection_id, record) in &self.records {
            commands.push(BridgeMessage::UserConnectionNewEvent { connection_id });
            if record.identity.is_resolved() {
                commands.push(BridgeMessage::UserConnectionIdentificationEvent {
                    connection_id,
                    user_id: record.identity,
                });
            }
            for (key, value) in &record.fields {
                commands.push(BridgeMessage::UserConnectionAddField {
                    connection_id,
                    key: key.clone(),
                    value: value.clone(),
                });
            }
            for channel in &record.channels {
                commands.push(BridgeMessage::UserConnectionSubscribe {
                    connection_id,
                    user_id: record.identity,
                    channel: channel.clone(),
                });
            }
        }
        commands
    }

    /// Applies one replicated message the way a downstream consumer would.
    ///
    /// A `syncWithState` replaces the whole replica with the result of its
    /// command log; keep-alives change nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Consistency`] if the message references a
    /// record that does not exist (or creates one that does).
    pub fn apply(&mut self, message: &BridgeMessage) -> Result<(), GatewayError> {
        match message {
            BridgeMessage::KeepAlive { .. } => Ok(()),
            BridgeMessage::SyncWithState { commands } => {
                let mut rebuilt = Self::new();
                for command in commands {
                    rebuilt.apply(command)?;
                }
                *self = rebuilt;
                Ok(())
            }
            BridgeMessage::UserConnectionNewEvent { connection_id } => self.create(*connection_id),
            BridgeMessage::UserConnectionAddField {
                connection_id,
                key,
                value,
            } => self.add_field(*connection_id, key, value.clone()),
            BridgeMessage::UserConnectionIdentificationEvent {
                connection_id,
                user_id,
            } => self.identify(*connection_id, *user_id),
            BridgeMessage::UserConnectionSubscribe {
                connection_id,
                channel,
                ..
            } => self.subscribe(*connection_id, channel),
            BridgeMessage::UserConnectionDestroyEvent { connection_id, .. } => {
                self.remove(*connection_id).map(|_| ())
            }
        }
    }

    fn record_mut(&mut self, id: ConnectionId, op: &str) -> Result<&mut MetadataRecord, GatewayError> {
        self.records.get_mut(&id).ok_or_else(|| missing(id, op))
    }
}

fn missing(id: ConnectionId, op: &str) -> GatewayError {
    GatewayError::Consistency(format!("{op} on connection {id} which has no record"))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn populated() -> MetadataReplica {
        let mut replica = MetadataReplica::new();
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);
        assert!(replica.create(a).is_ok());
        assert!(replica.add_field(a, "IP", Value::from("10.0.0.1")).is_ok());
        assert!(replica.identify(a, Identity::User(42)).is_ok());
        assert!(replica.subscribe(a, "news").is_ok());
        assert!(replica.subscribe(a, "sport").is_ok());
        assert!(replica.create(b).is_ok());
        assert!(replica.add_field(b, "userAgent", Value::Null).is_ok());
        replica
    }

    #[test]
    fn snapshot_orders_commands_per_record() {
        let commands = populated().snapshot();
        let a = ConnectionId::new(1);
        assert_eq!(
            commands.first(),
            Some(&BridgeMessage::UserConnectionNewEvent { connection_id: a })
        );
        assert_eq!(
            commands.get(1),
            Some(&BridgeMessage::UserConnectionIdentificationEvent {
                connection_id: a,
                user_id: Identity::User(42),
            })
        );
        // b is unresolved: creation then its single field, no identification.
        assert_eq!(commands.len(), 5 + 2);
    }

    #[test]
    fn snapshot_reconstructs_identical_replica() {
        let source = populated();
        let mut receiver = MetadataReplica::new();
        let sync = BridgeMessage::SyncWithState {
            commands: source.snapshot(),
        };
        assert!(receiver.apply(&sync).is_ok());
        assert_eq!(receiver, source);
    }

    #[test]
    fn operations_on_missing_record_are_consistency_errors() {
        let mut replica = MetadataReplica::new();
        let id = ConnectionId::new(5);
        assert!(matches!(
            replica.identify(id, Identity::Guest),
            Err(GatewayError::Consistency(_))
        ));
        assert!(matches!(replica.remove(id), Err(GatewayError::Consistency(_))));
        assert!(replica.create(id).is_ok());
        assert!(matches!(replica.create(id), Err(GatewayError::Consistency(_))));
    }

    #[test]
    fn fields_replace_in_place_and_channels_dedupe() {
        let mut replica = MetadataReplica::new();
        let id = ConnectionId::new(1);
        assert!(replica.create(id).is_ok());
        assert!(replica.add_field(id, "a", Value::from(1)).is_ok());
        assert!(replica.add_field(id, "b", Value::from(2)).is_ok());
        assert!(replica.add_field(id, "a", Value::from(3)).is_ok());
        assert!(replica.subscribe(id, "news").is_ok());
        assert!(replica.subscribe(id, "news").is_ok());

        let Some(record) = replica.get(id) else {
            panic!("record should exist");
        };
        assert_eq!(
            record.fields,
            vec![("a".to_string(), Value::from(3)), ("b".to_string(), Value::from(2))]
        );
        assert_eq!(record.channels, vec!["news".to_string()]);
        assert_eq!(record.field("b"), Some(&Value::from(2)));
    }
}
