//! CLI command implementations

pub mod batch;
pub mod bin;
pub mod init;
pub mod item;
pub mod notify;
pub mod order;
pub mod request;
