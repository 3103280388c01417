//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

use crate::dispatch::RawMessagePolicy;
use crate::error::GatewayError;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Redis connection string used by every Redis-backed collaborator.
    pub redis_url: String,

    /// Per-connection heartbeat settings.
    pub heartbeat: HeartbeatConfig,

    /// How the dispatcher treats bus payloads with an unknown kind.
    pub raw_message_policy: RawMessagePolicy,

    /// Guest, session and anti-forgery rules applied at identification.
    pub access: AccessPolicy,

    /// Metadata bridge channels and keep-alive period.
    pub bridge: BridgeConfig,

    /// Redis key layout for the allocator, replay cache and oracle.
    pub keys: KeyLayout,

    /// Token required in `x-admin-token` for admin routes. `None` leaves
    /// them open.
    pub admin_token: Option<String>,
}

/// Heartbeat literal and the window its interval is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Literal frame sent when the connection has been idle.
    pub message: String,
    /// Lower bound of the randomized interval.
    pub min_interval: Duration,
    /// Upper bound of the randomized interval.
    pub max_interval: Duration,
}

impl HeartbeatConfig {
    /// Builds a heartbeat config, swapping the bounds if `min > max`.
    #[must_use]
    pub fn new(message: impl Into<String>, min_interval: Duration, max_interval: Duration) -> Self {
        let (min_interval, max_interval) = if min_interval <= max_interval {
            (min_interval, max_interval)
        } else {
            (max_interval, min_interval)
        };
        Self {
            message: message.into(),
            min_interval,
            max_interval,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new("h", Duration::from_secs(20), Duration::from_secs(30))
    }
}

/// Rules deciding who may hold a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Whether unauthenticated (guest) connections are allowed.
    pub guests_enabled: bool,
    /// Maximum concurrent guest connections. `None` means unlimited.
    ///
    /// The limit applies per gateway process: only guests in this
    /// instance's [`crate::domain::ConnectionRegistry`] are counted, not
    /// guests connected to other instances sharing the bus.
    pub max_guests: Option<usize>,
    /// Whether session users must also present the anti-forgery cookie.
    pub csrf_required: bool,
    /// Name of the cookie carrying the session credential.
    pub session_cookie: String,
    /// Name of the anti-forgery cookie.
    pub csrf_cookie: String,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            guests_enabled: true,
            max_guests: None,
            csrf_required: false,
            session_cookie: "crossSessionId".to_string(),
            csrf_cookie: "csrftoken".to_string(),
        }
    }
}

/// Metadata bridge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Bus channel the bridge publishes replication messages on.
    pub output_stream: String,
    /// Bus channel the bridge listens to for control requests.
    pub input_stream: String,
    /// Idle period after which the bridge announces itself. `None`
    /// disables the self-initiated keep-alive.
    pub keep_alive: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            output_stream: "meta-bridge-out".to_string(),
            input_stream: "meta-bridge-in".to_string(),
            keep_alive: Some(Duration::from_secs(30)),
        }
    }
}

/// Redis key names used by the Redis-backed collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    /// Counter incremented to allocate process-unique ids.
    pub id_counter: String,
    /// Prefix of `channel:index` replay cache keys.
    pub replay_prefix: String,
    /// Prefix of session-token → user-id keys.
    pub session_prefix: String,
    /// Set of channels every identity may subscribe to.
    pub public_channels: String,
    /// Prefix of per-channel sets of permitted user ids.
    pub channel_acl_prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            id_counter: "gateway:uid-counter".to_string(),
            replay_prefix: String::new(),
            session_prefix: "session:".to_string(),
            public_channels: "gateway:public-channels".to_string(),
            channel_acl_prefix: "gateway:acl:".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if `LISTEN_ADDR` cannot be
    /// parsed as a [`SocketAddr`] or `RAW_MESSAGE_POLICY` names an unknown
    /// policy.
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| GatewayError::InvalidRequest(format!("LISTEN_ADDR: {e}")))?;

        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let heartbeat = HeartbeatConfig::new(
            std::env::var("HEARTBEAT_MESSAGE").unwrap_or_else(|_| "h".to_string()),
            Duration::from_millis(parse_env("HEARTBEAT_MIN_MS", 20_000)),
            Duration::from_millis(parse_env("HEARTBEAT_MAX_MS", 30_000)),
        );

        let raw_message_policy = match std::env::var("RAW_MESSAGE_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => RawMessagePolicy::default(),
        };

        let defaults = AccessPolicy::default();
        let max_guests: usize = parse_env("MAX_GUESTS", 0);
        let access = AccessPolicy {
            guests_enabled: parse_env_bool("ENABLE_GUESTS", true),
            max_guests: (max_guests > 0).then_some(max_guests),
            csrf_required: parse_env_bool("ENABLE_CSRF", false),
            session_cookie: std::env::var("SESSION_COOKIE").unwrap_or(defaults.session_cookie),
            csrf_cookie: std::env::var("CSRF_COOKIE").unwrap_or(defaults.csrf_cookie),
        };

        let defaults = BridgeConfig::default();
        let keep_alive_ms: u64 = parse_env("METADATA_KEEP_ALIVE_MS", 30_000);
        let bridge = BridgeConfig {
            output_stream: std::env::var("METADATA_OUTPUT_STREAM")
                .unwrap_or(defaults.output_stream),
            input_stream: std::env::var("METADATA_INPUT_STREAM").unwrap_or(defaults.input_stream),
            keep_alive: (keep_alive_ms > 0).then(|| Duration::from_millis(keep_alive_ms)),
        };

        let defaults = KeyLayout::default();
        let keys = KeyLayout {
            id_counter: std::env::var("ID_COUNTER_KEY").unwrap_or(defaults.id_counter),
            replay_prefix: std::env::var("REPLAY_KEY_PREFIX").unwrap_or(defaults.replay_prefix),
            session_prefix: std::env::var("SESSION_KEY_PREFIX")
                .unwrap_or(defaults.session_prefix),
            public_channels: std::env::var("PUBLIC_CHANNELS_KEY")
                .unwrap_or(defaults.public_channels),
            channel_acl_prefix: std::env::var("CHANNEL_ACL_PREFIX")
                .unwrap_or(defaults.channel_acl_prefix),
        };

        let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

        Ok(Self {
            listen_addr,
            redis_url,
            heartbeat,
            raw_message_policy,
            access,
            bridge,
            keys,
            admin_token,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_bounds_are_normalised() {
        let hb = HeartbeatConfig::new("h", Duration::from_secs(9), Duration::from_secs(3));
        assert_eq!(hb.min_interval, Duration::from_secs(3));
        assert_eq!(hb.max_interval, Duration::from_secs(9));
    }

    #[test]
    fn access_defaults_allow_guests() {
        let access = AccessPolicy::default();
        assert!(access.guests_enabled);
        assert_eq!(access.max_guests, None);
        assert!(!access.csrf_required);
        assert_eq!(access.session_cookie, "crossSessionId");
    }

    #[test]
    fn parse_env_falls_back_on_missing_key() {
        let value: u64 = parse_env("FANOUT_GATEWAY_TEST_UNSET_KEY", 42);
        assert_eq!(value, 42);
        assert!(parse_env_bool("FANOUT_GATEWAY_TEST_UNSET_KEY", true));
    }
}
