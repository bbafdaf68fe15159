//! Collections command: list configured collections.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{CollectionConfig, Config, SchemeConfig};

#[derive(Debug, Serialize)]
pub struct CollectionRow {
    pub id: String,
    pub fetch_one: Option<String>,
    pub fetch_some: Option<String>,
    pub item_lifespan: String,
    pub ignore_key_mismatch: bool,
}

fn describe(scheme: &SchemeConfig) -> String {
    format!("{} {}", scheme.method, scheme.uri)
}

impl From<&CollectionConfig> for CollectionRow {
    fn from(collection: &CollectionConfig) -> Self {
        Self {
            id: collection.id.clone(),
            fetch_one: collection.fetch_one.as_ref().map(describe),
            fetch_some: collection.fetch_some.as_ref().map(describe),
            item_lifespan: collection.settings.default_item_lifespan.to_string(),
            ignore_key_mismatch: collection.settings.ignore_key_mismatch,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CollectionsOutput {
    pub collections: Vec<CollectionRow>,
}

impl CommandOutput for CollectionsOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "fetch one", "fetch some", "lifespan"]);
        for row in &self.collections {
            table.add_row(vec![
                row.id.clone(),
                row.fetch_one.clone().unwrap_or_else(|| "-".into()),
                row.fetch_some.clone().unwrap_or_else(|| "-".into()),
                row.item_lifespan.clone(),
            ]);
        }
        render_list("collection", &table, self.collections.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let out = CollectionsOutput {
        collections: config.collections.iter().map(CollectionRow::from).collect(),
    };
    output(&out, json_mode);
    Ok(())
}
