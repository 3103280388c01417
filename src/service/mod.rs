//! Service layer: operations spanning every live connection.
//!
//! [`DirectiveBroadcast`] pushes an administrative directive to all
//! connections in the [`crate::domain::ConnectionRegistry`], in paced batches.

pub mod broadcast;

pub use broadcast::{DirectiveBroadcast, DirectivePlan};
