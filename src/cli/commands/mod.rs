//! CLI command implementations.

pub mod collections;
pub mod get;
pub mod watch;
