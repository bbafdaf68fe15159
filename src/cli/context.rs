//! Runtime assembled from configuration for one CLI invocation.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::adapters::http::{json_fetcher, ReqwestExecutor};
use crate::domain::models::{CacheKey, Config};
use crate::domain::ports::{RequestExecutor, SystemClock};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{CacheStore, JsonCollection, Scheduler};

/// Load configuration from `path`, or from the layered defaults when absent.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Build a store holding one JSON collection per configured collection,
/// driven by the wall clock. Collections without a batch scheme fetch
/// batches one key at a time.
pub fn build_store(config: &Config) -> Result<CacheStore> {
    let scheduler = Arc::new(Scheduler::new(Arc::new(SystemClock), config.scheduler.clone()));
    let executor: Arc<dyn RequestExecutor> = Arc::new(
        ReqwestExecutor::new(&config.http).context("Failed to build HTTP client")?,
    );

    let store = CacheStore::new("cli", scheduler, Arc::clone(&executor));
    for collection in &config.collections {
        let fetcher = json_fetcher(
            Arc::clone(&executor),
            collection.fetch_one.as_ref(),
            collection.fetch_some.as_ref(),
        );
        let mut settings = collection.settings;
        if collection.fetch_some.is_none() {
            settings.fetch_batch_sequentially = true;
        }
        store.register_collection(Some(&collection.id), Arc::new(fetcher), settings);
        debug!(collection = %collection.id, "registered configured collection");
    }
    Ok(store)
}

/// Look up a configured collection by id.
pub fn open_collection(store: &CacheStore, id: &str) -> Result<JsonCollection> {
    store
        .collection(id)
        .with_context(|| format!("Collection '{id}' is not configured"))
}

/// Parse command-line keys; integers become integer keys.
pub fn parse_keys(raw: &[String]) -> Vec<CacheKey> {
    raw.iter()
        .map(|key| match key.parse::<CacheKey>() {
            Ok(key) => key,
            Err(never) => match never {},
        })
        .collect()
}
