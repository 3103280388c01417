//! WebSocket layer: client protocol, connection state machine, upgrade.
//!
//! The WebSocket endpoint at `/ws` carries the line protocol described in
//! [`protocol`]. Each accepted socket is driven by one
//! [`connection::run_connection`] task.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod upgrade;

pub use connection::{Connection, ConnectionState};
pub use upgrade::UpgradeInfo;
