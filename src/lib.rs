//! # fanout-gateway
//!
//! Real-time gateway between a publish/subscribe bus and WebSocket clients.
//!
//! Clients speak a line-oriented text protocol: they subscribe to named
//! channels, optionally replay indexed messages from a cache, and receive
//! every matching bus message. Subscriptions are gated by a permission
//! oracle, identities are resolved from a session cookie, and the metadata
//! of every live connection is replicated to external consumers through a
//! sync bridge.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket clients                     Admin / health (HTTP)
//!     │                                     │
//!     ├── Connection tasks (ws/)            ├── REST handlers (api/)
//!     │     state machine, replay           ├── DirectiveBroadcast (service/)
//!     │                                     │
//!     ├── Dispatcher (dispatch/) ◄── bus pump ◄── Redis pub/sub
//!     ├── ConnectionRegistry, PermissionTracker (domain/)
//!     │
//!     ├── Metadata bridge task (bridge/) ──► Redis publish
//!     │                                 ◄── control channel
//!     └── Collaborators (adapters/): Redis and in-memory
//! ```

pub mod adapters;
pub mod api;
pub mod app_state;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
