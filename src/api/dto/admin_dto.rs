//! Request and response bodies of the administrative endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /admin/refresh`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefreshRequest {
    /// Connections reached per batch. Must be positive.
    pub batch_size: usize,
    /// Pause after each batch, in milliseconds.
    #[serde(default)]
    pub batch_delay_ms: u64,
    /// Pause after each connection, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Directive pushed as `c <command>`. Defaults to `refresh`.
    #[serde(default = "default_command")]
    pub command: String,
}

/// Accepted push, sized at request time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    /// Directive being pushed.
    pub command: String,
    /// Live connections in the snapshot.
    pub connections: usize,
    /// Number of batches.
    pub batches: usize,
}

fn default_command() -> String {
    "refresh".to_string()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn command_and_delays_default() {
        let Ok(req) = serde_json::from_str::<RefreshRequest>(r#"{"batch_size":10}"#) else {
            panic!("minimal body rejected");
        };
        assert_eq!(req.command, "refresh");
        assert_eq!(req.batch_delay_ms, 0);
        assert_eq!(req.delay_ms, 0);
    }
}
