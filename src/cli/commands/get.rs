//! Get command: fetch items of a configured collection.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use crate::cli::context::{build_store, open_collection, parse_keys};
use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{CacheKey, Config};
use crate::services::{CacheItem, JsonCollection};

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Collection id from configuration
    pub collection: String,

    /// Keys to fetch; integer keys are sent as numbers
    #[arg(required = true)]
    pub keys: Vec<String>,
}

/// Serializable view of one cached item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub key: CacheKey,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    pub update_count: u64,
    pub next_update: Option<DateTime<Utc>>,
}

impl From<&CacheItem<CacheKey, Value>> for ItemView {
    fn from(item: &CacheItem<CacheKey, Value>) -> Self {
        let entry = item.entry();
        Self {
            key: entry.key,
            value: entry.value,
            updated_at: item.updated_at(),
            update_count: item.update_count(),
            next_update: item.next_update_time(),
        }
    }
}

/// Table of item views with KEY / VALUE / UPDATED / NEXT UPDATE columns.
pub fn items_table(items: &[ItemView]) -> String {
    let mut table = list_table(&["key", "value", "updated", "next update"]);
    for item in items {
        table.add_row(vec![
            item.key.to_string(),
            truncate(&item.value.to_string(), 60),
            item.updated_at.format("%H:%M:%S").to_string(),
            item.next_update
                .map_or_else(|| "-".to_string(), |at| at.format("%H:%M:%S").to_string()),
        ]);
    }
    render_list("item", &table, items.len())
}

#[derive(Debug, Serialize)]
pub struct GetOutput {
    pub collection: String,
    pub items: Vec<ItemView>,
}

impl CommandOutput for GetOutput {
    fn to_human(&self) -> String {
        items_table(&self.items)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Fetch `keys` through the collection: one key goes through the single-item
/// path, several through the batch path.
pub async fn fetch_items(
    collection: &JsonCollection,
    keys: &[CacheKey],
) -> Result<Vec<std::sync::Arc<CacheItem<CacheKey, Value>>>> {
    match keys {
        [key] => {
            let item = collection
                .get_one(key)
                .await
                .with_context(|| format!("Failed to fetch '{key}' from {}", collection.id()))?;
            Ok(vec![item])
        }
        _ => collection
            .get_some(keys)
            .await
            .with_context(|| format!("Failed to fetch {} keys from {}", keys.len(), collection.id())),
    }
}

pub async fn execute(args: GetArgs, config: &Config, json_mode: bool) -> Result<()> {
    let store = build_store(config)?;
    let collection = open_collection(&store, &args.collection)?;
    let keys = parse_keys(&args.keys);

    let items = fetch_items(&collection, &keys).await?;
    let out = GetOutput {
        collection: args.collection,
        items: items.iter().map(|item| ItemView::from(item.as_ref())).collect(),
    };
    output(&out, json_mode);
    Ok(())
}
