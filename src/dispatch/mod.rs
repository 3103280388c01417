//! Upstream bus fan-out: wire format parsing and the channel dispatcher.

pub mod dispatcher;
pub mod message;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use message::{BusPayload, Classified, RawMessagePolicy, classify};
