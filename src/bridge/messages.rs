//! Wire format of the metadata replication channel.
//!
//! Outbound messages are JSON objects tagged by a `type` property with
//! camel-cased field names, stamped with the emitting instance id:
//!
//! ```json
//! {"id":3,"type":"userConnectionSubscribe","connectionId":12,"userId":0,"channel":"news"}
//! ```
//!
//! Inbound control messages are parsed leniently from a [`serde_json::Value`]
//! so that every malformation can be reported precisely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ConnectionId, Identity};
use crate::error::GatewayError;

/// One outbound replication message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeMessage {
    /// Liveness marker of the emitting instance.
    KeepAlive {
        /// Expiry hint in milliseconds, absent when self keep-alive is off.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    /// Full state of the instance as an ordered command log.
    SyncWithState {
        /// Commands that rebuild every live record when applied in order.
        commands: Vec<BridgeMessage>,
    },
    /// A connection received its id.
    UserConnectionNewEvent {
        /// Connection the record belongs to.
        connection_id: ConnectionId,
    },
    /// An attribute was recorded on a connection.
    UserConnectionAddField {
        /// Connection the record belongs to.
        connection_id: ConnectionId,
        /// Field name.
        key: String,
        /// Field value, `null` when unknown.
        value: Value,
    },
    /// A connection's identity was resolved.
    UserConnectionIdentificationEvent {
        /// Connection the record belongs to.
        connection_id: ConnectionId,
        /// Resolved identity.
        user_id: Identity,
    },
    /// A connection was granted a subscription.
    UserConnectionSubscribe {
        /// Connection the record belongs to.
        connection_id: ConnectionId,
        /// Identity at the time of the grant.
        user_id: Identity,
        /// Subscribed channel.
        channel: String,
    },
    /// A connection went away.
    UserConnectionDestroyEvent {
        /// Connection the record belonged to.
        connection_id: ConnectionId,
        /// Identity at the time of teardown.
        user_id: Identity,
    },
}

/// A [`BridgeMessage`] stamped with the id of the emitting instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped {
    /// Instance id of the emitting bridge.
    pub id: u64,
    /// The message itself.
    #[serde(flatten)]
    pub message: BridgeMessage,
}

/// A parsed inbound control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Every instance re-emits its snapshot.
    RequestSyncAll,
    /// Every instance emits a keep-alive.
    CheckAliveAll,
    /// Only the instance with this id re-emits its snapshot.
    RequestSync {
        /// Target instance id.
        id: u64,
    },
    /// Only the instance with this id emits a keep-alive.
    CheckAlive {
        /// Target instance id.
        id: u64,
    },
}

impl ControlCommand {
    /// Parses one raw control payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Serialization`] if the payload is not JSON,
    /// and [`GatewayError::Protocol`] if it has no `type`, an unknown `type`,
    /// or is a targeted command without a usable `id`.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(raw)?;
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(GatewayError::Protocol("no type property".to_string()));
        };
        match kind {
            "requestSyncAll" => Ok(Self::RequestSyncAll),
            "checkAliveAll" => Ok(Self::CheckAliveAll),
            "requestSync" => target_id(&value, kind).map(|id| Self::RequestSync { id }),
            "checkAlive" => target_id(&value, kind).map(|id| Self::CheckAlive { id }),
            other => Err(GatewayError::Protocol(format!("invalid type {other:?}"))),
        }
    }

    /// Returns `true` if an instance with `own_id` must act on this command.
    #[must_use]
    pub fn applies_to(self, own_id: Option<u64>) -> bool {
        match self {
            Self::RequestSyncAll | Self::CheckAliveAll => true,
            Self::RequestSync { id } | Self::CheckAlive { id } => own_id == Some(id),
        }
    }
}

/// Extracts the target id of a targeted command. Numeric strings are
/// accepted as well as numbers.
fn target_id(value: &Value, kind: &str) -> Result<u64, GatewayError> {
    let id = match value.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => return Err(GatewayError::Protocol(format!("{kind} message should contain id"))),
    };
    id.ok_or_else(|| GatewayError::Protocol(format!("{kind} message has an invalid id")))
}
