//! Collection settings and their named, validated boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::lifespan::{Lifespan, RefreshPolicy};
use crate::domain::errors::{CacheError, CacheResult};

/// Typed settings of a cache collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CollectionSettings {
    /// Accept a fetched item whose key differs from the requested key.
    pub ignore_key_mismatch: bool,
    /// Fetch missing keys of a batch one by one instead of with one batch call.
    pub fetch_batch_sequentially: bool,
    /// Lifespan given to newly created items.
    pub default_item_lifespan: Lifespan,
    /// Keep payload history on newly created items.
    pub keep_item_history: bool,
    /// Newly created items refresh once and stop.
    pub update_items_once: bool,
    /// Cap on successful refreshes of newly created items.
    pub max_item_updates: Option<u64>,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            ignore_key_mismatch: false,
            fetch_batch_sequentially: false,
            default_item_lifespan: Lifespan::Infinite,
            keep_item_history: false,
            update_items_once: false,
            max_item_updates: None,
        }
    }
}

impl CollectionSettings {
    /// Refresh policy applied to items created by the collection.
    pub fn item_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            keep_history: self.keep_item_history,
            update_once: self.update_items_once,
            max_updates: self.max_item_updates,
            reschedule_on_failure: false,
        }
    }

    pub fn get(&self, name: SettingName) -> SettingValue {
        match name {
            SettingName::IgnoreKeyMismatch => SettingValue::Bool(self.ignore_key_mismatch),
            SettingName::FetchBatchSequentially => SettingValue::Bool(self.fetch_batch_sequentially),
            SettingName::DefaultItemLifespan => SettingValue::Lifespan(self.default_item_lifespan),
            SettingName::KeepItemHistory => SettingValue::Bool(self.keep_item_history),
            SettingName::UpdateItemsOnce => SettingValue::Bool(self.update_items_once),
            SettingName::MaxItemUpdates => SettingValue::Count(self.max_item_updates),
        }
    }

    /// Apply a value to a named setting. The value type must match the
    /// setting; on error nothing is changed.
    pub fn set(&mut self, name: SettingName, value: SettingValue) -> CacheResult<()> {
        let mismatch = |expected: &str| CacheError::InvalidSettingValue {
            name: name.to_string(),
            reason: format!("expected {expected}, got {value:?}"),
        };

        match (name, value) {
            (SettingName::IgnoreKeyMismatch, SettingValue::Bool(b)) => self.ignore_key_mismatch = b,
            (SettingName::FetchBatchSequentially, SettingValue::Bool(b)) => {
                self.fetch_batch_sequentially = b;
            }
            (SettingName::KeepItemHistory, SettingValue::Bool(b)) => self.keep_item_history = b,
            (SettingName::UpdateItemsOnce, SettingValue::Bool(b)) => self.update_items_once = b,
            (SettingName::DefaultItemLifespan, SettingValue::Lifespan(l)) => {
                self.default_item_lifespan = l;
            }
            (SettingName::MaxItemUpdates, SettingValue::Count(c)) => self.max_item_updates = c,
            (SettingName::DefaultItemLifespan, _) => return Err(mismatch("a lifespan")),
            (SettingName::MaxItemUpdates, _) => return Err(mismatch("an optional count")),
            _ => return Err(mismatch("a boolean")),
        }
        Ok(())
    }
}

/// The fixed set of setting names a collection accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingName {
    IgnoreKeyMismatch,
    FetchBatchSequentially,
    DefaultItemLifespan,
    KeepItemHistory,
    UpdateItemsOnce,
    MaxItemUpdates,
}

impl SettingName {
    pub const ALL: [SettingName; 6] = [
        Self::IgnoreKeyMismatch,
        Self::FetchBatchSequentially,
        Self::DefaultItemLifespan,
        Self::KeepItemHistory,
        Self::UpdateItemsOnce,
        Self::MaxItemUpdates,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IgnoreKeyMismatch => "ignore_key_mismatch",
            Self::FetchBatchSequentially => "fetch_batch_sequentially",
            Self::DefaultItemLifespan => "default_item_lifespan",
            Self::KeepItemHistory => "keep_item_history",
            Self::UpdateItemsOnce => "update_items_once",
            Self::MaxItemUpdates => "max_item_updates",
        }
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingName {
    type Err = CacheError;

    /// Accepts snake_case and camelCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore_key_mismatch" | "ignoreKeyMismatch" => Ok(Self::IgnoreKeyMismatch),
            "fetch_batch_sequentially" | "fetchBatchSequentially" => Ok(Self::FetchBatchSequentially),
            "default_item_lifespan" | "defaultItemLifespan" => Ok(Self::DefaultItemLifespan),
            "keep_item_history" | "keepItemHistory" => Ok(Self::KeepItemHistory),
            "update_items_once" | "updateItemsOnce" => Ok(Self::UpdateItemsOnce),
            "max_item_updates" | "maxItemUpdates" => Ok(Self::MaxItemUpdates),
            other => Err(CacheError::UnknownSetting(other.to_string())),
        }
    }
}

/// Value carried across the named settings boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Lifespan(Lifespan),
    Count(Option<u64>),
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Lifespan> for SettingValue {
    fn from(l: Lifespan) -> Self {
        Self::Lifespan(l)
    }
}
