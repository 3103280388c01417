//! Metadata sync bridge.
//!
//! One bridge runs per process. It mirrors the lifecycle of every
//! identified connection as a stream of JSON commands on the outbound
//! replication channel and answers sync / keep-alive requests arriving on
//! the inbound control channel.
//!
//! - [`messages`]: wire format of both channels
//! - [`replica`]: the local record of every live connection
//! - [`state`]: the synchronous bridge (replica + buffered emission)
//! - [`task`]: the tokio task driving it and the [`BridgeHandle`] used by
//!   connections

pub mod messages;
pub mod replica;
pub mod state;
pub mod task;

pub use messages::{BridgeMessage, ControlCommand, Stamped};
pub use replica::{MetadataRecord, MetadataReplica};
pub use state::MetadataBridge;
pub use task::{BridgeCommand, BridgeHandle, spawn_bridge};
