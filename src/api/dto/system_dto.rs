//! Response bodies of the system endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests.
    pub status: String,
    /// RFC 3339 timestamp of the check.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Live client connections.
    pub connections: usize,
    /// Upstream channels with at least one subscriber.
    pub channels: usize,
    /// Metadata bridge instance id, once allocated.
    pub bridge_id: Option<u64>,
}
