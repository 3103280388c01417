//! Domain layer: identifiers, connection mailboxes and shared tables.
//!
//! This module contains the types every component agrees on: connection
//! keys and ids, resolved identities, the mailbox handle used to reach a
//! connection task, the global connection registry, the permission request
//! tracker, and the paired index the dispatcher is built on.

pub mod bi_index;
pub mod connection_handle;
pub mod connection_registry;
pub mod ids;
pub mod permission_tracker;

pub use bi_index::BiIndex;
pub use connection_handle::{ConnectionEvent, ConnectionHandle, ReplayEntry};
pub use connection_registry::ConnectionRegistry;
pub use ids::{ConnectionId, ConnectionKey, Identity};
pub use permission_tracker::PermissionTracker;
