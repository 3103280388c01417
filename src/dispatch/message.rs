//! Upstream bus wire format.
//!
//! Every bus message is `<kind> <payload>`:
//!
//! - `i <index> <content>`: indexed (ordered, replayable) message
//! - `v <content>`: vanilla (unordered) message
//! - anything else: raw, handled according to [`RawMessagePolicy`]
//!
//! [`BusPayload`] keeps the kind after parsing so that downstream code can
//! tell ordering guarantees apart without re-parsing, and its `Display`
//! re-tags the payload the way clients receive it.

use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

/// A parsed bus message as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusPayload {
    /// Message carrying a stream index.
    Indexed {
        /// Monotonically increasing position in the channel's stream.
        index: u64,
        /// Message content.
        content: String,
    },
    /// Message without ordering guarantees.
    Vanilla(String),
    /// Unclassified message forwarded verbatim.
    Raw(String),
}

impl BusPayload {
    /// Stream index of an indexed message.
    #[must_use]
    pub const fn index(&self) -> Option<u64> {
        match self {
            Self::Indexed { index, .. } => Some(*index),
            Self::Vanilla(_) | Self::Raw(_) => None,
        }
    }
}

impl fmt::Display for BusPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed { index, content } => write!(f, "i {index} {content}"),
            Self::Vanilla(content) => write!(f, "v {content}"),
            Self::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Result of classifying a bus message by its kind prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Kind `i` or `v`, fully parsed.
    Known(BusPayload),
    /// Any other kind; carries the whole original message.
    Raw(String),
}

/// Splits a bus message into its kind and payload.
///
/// # Errors
///
/// Returns [`GatewayError::BusMessage`] if an `i` message has an index that
/// is not a non-negative integer.
pub fn classify(channel: &str, message: &str) -> Result<Classified, GatewayError> {
    let Some((kind, rest)) = message.split_once(' ') else {
        return Ok(Classified::Raw(message.to_string()));
    };
    match kind {
        "i" => {
            let (index, content) = rest.split_once(' ').unwrap_or((rest, ""));
            let index = index.parse::<u64>().map_err(|e| GatewayError::BusMessage {
                channel: channel.to_string(),
                reason: format!("bad index {index:?}: {e}"),
            })?;
            Ok(Classified::Known(BusPayload::Indexed {
                index,
                content: content.to_string(),
            }))
        }
        "v" => Ok(Classified::Known(BusPayload::Vanilla(rest.to_string()))),
        _ => Ok(Classified::Raw(message.to_string())),
    }
}

/// What the dispatcher does with a message of unknown kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawMessagePolicy {
    /// Log an error and drop the message.
    #[default]
    Error,
    /// Drop the message silently.
    SuppressError,
    /// Deliver the whole message as vanilla content.
    TreatAsVanilla,
    /// Deliver the message verbatim.
    PassRaw,
}

impl FromStr for RawMessagePolicy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "suppressError" => Ok(Self::SuppressError),
            "treatAsVanilla" => Ok(Self::TreatAsVanilla),
            "passRaw" => Ok(Self::PassRaw),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown raw message policy {other:?}"
            ))),
        }
    }
}

impl fmt::Display for RawMessagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::SuppressError => "suppressError",
            Self::TreatAsVanilla => "treatAsVanilla",
            Self::PassRaw => "passRaw",
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn indexed_message_is_parsed() {
        let Ok(Classified::Known(payload)) = classify("news", "i 5 hello world") else {
            panic!("expected indexed message");
        };
        assert_eq!(payload.index(), Some(5));
        assert_eq!(payload.to_string(), "i 5 hello world");
    }

    #[test]
    fn vanilla_message_keeps_content() {
        let Ok(Classified::Known(payload)) = classify("news", "v hi there") else {
            panic!("expected vanilla message");
        };
        assert_eq!(payload, BusPayload::Vanilla("hi there".to_string()));
        assert_eq!(payload.to_string(), "v hi there");
    }

    #[test]
    fn unknown_kind_is_raw() {
        assert_eq!(
            classify("news", "x garbage").ok(),
            Some(Classified::Raw("x garbage".to_string()))
        );
        assert_eq!(
            classify("news", "nospace").ok(),
            Some(Classified::Raw("nospace".to_string()))
        );
    }

    #[test]
    fn bad_index_is_an_error() {
        assert!(classify("news", "i five hello").is_err());
    }

    #[test]
    fn policy_names_round_trip() {
        for name in ["error", "suppressError", "treatAsVanilla", "passRaw"] {
            let Ok(policy) = name.parse::<RawMessagePolicy>() else {
                panic!("policy {name} should parse");
            };
            assert_eq!(policy.to_string(), name);
        }
        assert!("drop".parse::<RawMessagePolicy>().is_err());
        assert_eq!(RawMessagePolicy::default(), RawMessagePolicy::Error);
    }
}
