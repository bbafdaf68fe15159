//! Watch command: fetch items, run the scheduler and report every refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::get::{fetch_items, items_table, ItemView};
use crate::cli::context::{build_store, open_collection, parse_keys};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{CacheKey, Config, Lifespan};
use crate::services::CacheItem;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Collection id from configuration
    pub collection: String,

    /// Keys to watch; integer keys are sent as numbers
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// How long to keep refreshing, in seconds
    #[arg(long, default_value = "60")]
    pub for_secs: u64,

    /// Item lifespan override, in seconds
    #[arg(long)]
    pub lifespan_secs: Option<u64>,

    /// How often refreshed values are checked for, in milliseconds
    #[arg(long, default_value = "250")]
    pub poll_ms: u64,
}

/// One observed refresh of a watched item.
#[derive(Debug, Serialize)]
pub struct RefreshEvent {
    pub item: ItemView,
}

impl CommandOutput for RefreshEvent {
    fn to_human(&self) -> String {
        format!(
            "[{}] {} refreshed (#{}): {}",
            self.item.updated_at.format("%H:%M:%S"),
            self.item.key,
            self.item.update_count,
            truncate(&self.item.value.to_string(), 80)
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct WatchSummary {
    pub collection: String,
    pub watched_secs: u64,
    pub refreshes: u64,
    pub items: Vec<ItemView>,
}

impl CommandOutput for WatchSummary {
    fn to_human(&self) -> String {
        format!(
            "Watched {} for {}s, {} refreshes.\n{}",
            self.collection,
            self.watched_secs,
            self.refreshes,
            items_table(&self.items)
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Tracks the last seen update count of each item.
#[derive(Debug, Default)]
struct RefreshTracker {
    seen: HashMap<CacheKey, u64>,
}

impl RefreshTracker {
    /// Items whose update count moved since the last poll.
    fn poll(&mut self, items: &[Arc<CacheItem<CacheKey, Value>>]) -> Vec<ItemView> {
        items
            .iter()
            .filter_map(|item| {
                let view = ItemView::from(item.as_ref());
                let last = self.seen.insert(view.key.clone(), view.update_count);
                (last.is_some_and(|last| last != view.update_count)).then_some(view)
            })
            .collect()
    }
}

pub async fn execute(args: WatchArgs, config: &Config, json_mode: bool) -> Result<()> {
    let store = build_store(config)?;
    let collection = open_collection(&store, &args.collection)?;
    if let Some(secs) = args.lifespan_secs {
        collection.update_settings(|settings| {
            settings.default_item_lifespan = Lifespan::from_secs(secs);
        });
    }

    let keys = parse_keys(&args.keys);
    let items = fetch_items(&collection, &keys).await?;

    let mut tracker = RefreshTracker::default();
    tracker.poll(&items);

    let driver = store.scheduler().start();
    info!(collection = %args.collection, keys = keys.len(), for_secs = args.for_secs, "watching");

    let deadline = tokio::time::sleep(Duration::from_secs(args.for_secs));
    tokio::pin!(deadline);
    let mut interval = tokio::time::interval(Duration::from_millis(args.poll_ms.max(10)));
    let mut refreshes = 0;

    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                for item in tracker.poll(&items) {
                    refreshes += 1;
                    output(&RefreshEvent { item }, json_mode);
                }
            }
        }
    }

    store.scheduler().stop();
    driver.await.context("Scheduler driver panicked")?;

    let summary = WatchSummary {
        collection: args.collection,
        watched_secs: args.for_secs,
        refreshes,
        items: items.iter().map(|item| ItemView::from(item.as_ref())).collect(),
    };
    output(&summary, json_mode);
    Ok(())
}
