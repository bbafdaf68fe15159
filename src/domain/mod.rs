//! Domain layer for the refresh cache
//!
//! Models, errors and the ports the engine depends on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{CacheError, CacheResult};
