//! Adapters for external systems.

pub mod http;
