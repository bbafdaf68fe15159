//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across integration test files.

#![allow(dead_code)]

use std::sync::Arc;

use refresh_cache::domain::models::{HttpClientConfig, SchemeConfig};
use refresh_cache::{ManualClock, ReqwestExecutor, Scheduler, SchedulerConfig};
use tempfile::TempDir;

/// Create a temporary directory for test isolation
///
/// Returns a TempDir that will be cleaned up when dropped.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Scheduler driven by a manual clock; advance the clock and call `tick`.
pub fn manual_scheduler() -> (Arc<ManualClock>, Arc<Scheduler>) {
    let clock = Arc::new(ManualClock::starting_now());
    let scheduler = Arc::new(Scheduler::new(clock.clone(), SchedulerConfig::default()));
    (clock, scheduler)
}

/// Real reqwest executor with a short timeout.
pub fn http_executor() -> Arc<ReqwestExecutor> {
    let config = HttpClientConfig {
        timeout_secs: 5,
        ..Default::default()
    };
    Arc::new(ReqwestExecutor::new(&config).expect("Failed to build HTTP client"))
}

/// GET scheme against `base` + `path`.
pub fn get_scheme(base: &str, path: &str) -> SchemeConfig {
    SchemeConfig {
        method: Default::default(),
        uri: format!("{base}{path}"),
        payload: None,
        key_field: "id".to_string(),
        items_field: None,
    }
}
