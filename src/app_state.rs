//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::adapters::{IdAllocator, PermissionOracle, ReplayCache};
use crate::bridge::BridgeHandle;
use crate::config::{AccessPolicy, HeartbeatConfig};
use crate::dispatch::Dispatcher;
use crate::domain::{ConnectionRegistry, PermissionTracker};

/// Everything a client connection works with.
///
/// One instance is shared by every connection of the process.
#[derive(Debug)]
pub struct GatewayContext {
    /// Channel fan-out.
    pub dispatcher: Arc<Dispatcher>,
    /// Live connections by id.
    pub registry: Arc<ConnectionRegistry>,
    /// In-flight oracle requests.
    pub tracker: Arc<PermissionTracker>,
    /// Metadata bridge.
    pub bridge: BridgeHandle,
    /// Connection id allocator.
    pub allocator: Arc<dyn IdAllocator>,
    /// Identity and subscription decisions.
    pub oracle: Arc<dyn PermissionOracle>,
    /// Stored indexed messages for replay.
    pub cache: Arc<dyn ReplayCache>,
    /// Heartbeat literal and window.
    pub heartbeat: HeartbeatConfig,
    /// Guest and anti-forgery rules.
    pub access: AccessPolicy,
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Connection context.
    pub gateway: Arc<GatewayContext>,
    /// Token required on admin routes, if any.
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    /// Wraps a context; admin routes are open when `admin_token` is `None`.
    #[must_use]
    pub fn new(gateway: GatewayContext, admin_token: Option<String>) -> Self {
        Self {
            gateway: Arc::new(gateway),
            admin_token: admin_token.map(Arc::from),
        }
    }
}
