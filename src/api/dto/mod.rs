//! Data Transfer Objects for REST request/response serialization.

pub mod admin_dto;
pub mod system_dto;

pub use admin_dto::*;
pub use system_dto::*;
