//! Client text protocol.
//!
//! One WebSocket text frame carries one line of space-separated tokens.
//!
//! Inbound:
//!
//! | Line              | Meaning                                         |
//! |-------------------|-------------------------------------------------|
//! | `s CHANNEL`       | subscribe                                       |
//! | `u CHANNEL`       | unsubscribe                                     |
//! | `r INDEX CHANNEL` | subscribe, replaying indexed messages > `INDEX` |
//!
//! Outbound frames are built by the functions of this module.

use serde::Serialize;

use crate::dispatch::BusPayload;
use crate::domain::Identity;
use crate::error::GatewayError;

/// A parsed client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `s CHANNEL`
    Subscribe(String),
    /// `u CHANNEL`
    Unsubscribe(String),
    /// `r INDEX CHANNEL`
    Resubscribe {
        /// Last index the client has seen on `channel`.
        index: u64,
        /// Channel to subscribe to.
        channel: String,
    },
}

impl ClientCommand {
    /// Parses one client line.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] for an unknown command, a wrong
    /// token count, or a non-numeric replay index.
    pub fn parse(line: &str) -> Result<Self, GatewayError> {
        let tokens: Vec<&str> = line.split(' ').collect();
        match tokens.as_slice() {
            ["s", channel] => Ok(Self::Subscribe((*channel).to_string())),
            ["u", channel] => Ok(Self::Unsubscribe((*channel).to_string())),
            ["r", index, channel] => {
                let index = index.parse().map_err(|_| {
                    GatewayError::Protocol(format!("invalid replay index {index:?}"))
                })?;
                Ok(Self::Resubscribe {
                    index,
                    channel: (*channel).to_string(),
                })
            }
            _ => Err(GatewayError::Protocol("invalid command".to_string())),
        }
    }
}

#[derive(Serialize)]
struct Decline<'a> {
    message: &'a str,
    reason: &'a str,
}

/// `c COMMAND`: administrative push.
#[must_use]
pub fn command(command: &str) -> String {
    format!("c {command}")
}

/// `efc MESSAGE`: fatal error, the connection closes afterwards.
#[must_use]
pub fn fatal(message: &str) -> String {
    format!("efc {message}")
}

/// Fatal decline of an identification, with a JSON body naming `reason`.
#[must_use]
pub fn decline(reason: &str) -> String {
    let body = Decline {
        message: "Decline websocket connection!",
        reason,
    };
    fatal(&serde_json::to_string(&body).unwrap_or_default())
}

/// `m CHANNEL <payload>`: forwarded bus message, re-tagged by kind.
#[must_use]
pub fn forward(channel: &str, payload: &BusPayload) -> String {
    format!("m {channel} {payload}")
}

/// `m CHANNEL i INDEX CONTENT`: replayed indexed message.
#[must_use]
pub fn replayed(channel: &str, index: u64, content: &str) -> String {
    format!("m {channel} i {index} {content}")
}

/// `m CHANNEL n INDEX`: requested index is no longer available.
#[must_use]
pub fn not_found(channel: &str, index: u64) -> String {
    format!("m {channel} n {index}")
}

/// `s CHANNEL`: subscription acknowledged.
#[must_use]
pub fn subscribed(channel: &str) -> String {
    format!("s {channel}")
}

/// `error invalidSubscription CHANNEL IDENTITY`: subscription denied.
#[must_use]
pub fn invalid_subscription(channel: &str, identity: Identity) -> String {
    format!("error invalidSubscription {channel} {identity}")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_lines() {
        assert_eq!(
            ClientCommand::parse("s news").ok(),
            Some(ClientCommand::Subscribe("news".to_string()))
        );
        assert_eq!(
            ClientCommand::parse("u news").ok(),
            Some(ClientCommand::Unsubscribe("news".to_string()))
        );
        assert_eq!(
            ClientCommand::parse("r 3 news").ok(),
            Some(ClientCommand::Resubscribe {
                index: 3,
                channel: "news".to_string()
            })
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in ["", "s", "s a b", "x news", "r news", "r -1 news", "r abc news", "u  news"] {
            assert!(
                matches!(ClientCommand::parse(line), Err(GatewayError::Protocol(_))),
                "{line:?} should be rejected"
            );
        }
    }

    #[test]
    fn builds_frames() {
        let indexed = BusPayload::Indexed {
            index: 5,
            content: "hello".to_string(),
        };
        assert_eq!(forward("news", &indexed), "m news i 5 hello");
        assert_eq!(forward("news", &BusPayload::Vanilla("hi".to_string())), "m news v hi");
        assert_eq!(replayed("news", 4, "four"), "m news i 4 four");
        assert_eq!(not_found("news", 5), "m news n 5");
        assert_eq!(subscribed("news"), "s news");
        assert_eq!(command("refresh"), "c refresh");
        assert_eq!(
            invalid_subscription("private", Identity::Guest),
            "error invalidSubscription private 0"
        );
    }

    #[test]
    fn decline_is_json_after_prefix() {
        let frame = decline("Invalid session");
        let Some(body) = frame.strip_prefix("efc ") else {
            panic!("missing efc prefix in {frame}");
        };
        let value: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
        assert_eq!(
            value.get("reason").and_then(serde_json::Value::as_str),
            Some("Invalid session")
        );
        assert_eq!(
            value.get("message").and_then(serde_json::Value::as_str),
            Some("Decline websocket connection!")
        );
    }
}
