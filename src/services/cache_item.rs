//! A single cached value.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::cache_collection::CollectionShared;
use super::refresh::{RefreshLifecycle, Refreshable};
use super::scheduler::Scheduler;
use crate::domain::errors::CacheResult;
use crate::domain::models::{Fetched, Lifespan, RefreshPolicy};

/// One cached value with its key, refreshed through the owning collection's
/// fetch strategy.
pub struct CacheItem<K, V> {
    lifecycle: RefreshLifecycle<Fetched<K, V>>,
    entry: Mutex<Fetched<K, V>>,
    collection: Mutex<Weak<CollectionShared<K, V>>>,
}

impl<K, V> CacheItem<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        entry: Fetched<K, V>,
        collection: Weak<CollectionShared<K, V>>,
        scheduler: Arc<Scheduler>,
        lifespan: Lifespan,
        policy: RefreshPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: RefreshLifecycle::new(scheduler, lifespan, policy),
            entry: Mutex::new(entry),
            collection: Mutex::new(collection),
        })
    }

    pub fn value(&self) -> V {
        self.entry.lock().value.clone()
    }

    pub fn key(&self) -> K {
        self.entry.lock().key.clone()
    }

    /// Key and value as one consistent pair.
    pub fn entry(&self) -> Fetched<K, V> {
        self.entry.lock().clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.lifecycle.created_at()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.lifecycle.updated_at()
    }

    pub fn update_count(&self) -> u64 {
        self.lifecycle.update_count()
    }

    pub fn lifespan(&self) -> Lifespan {
        self.lifecycle.lifespan()
    }

    pub fn next_update_time(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.next_update_time()
    }

    /// Past payloads keyed by the time they were captured.
    pub fn snapshots(&self) -> Vec<(DateTime<Utc>, Fetched<K, V>)> {
        self.lifecycle.snapshots()
    }
}

impl<K, V> CacheItem<K, V> {
    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_destroyed()
    }

    /// Abort the pending refresh and detach from the collection.
    pub fn destroy(&self) -> bool {
        *self.collection.lock() = Weak::new();
        self.lifecycle.destroy()
    }
}

#[async_trait]
impl<K, V> Refreshable for CacheItem<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Snapshot = Fetched<K, V>;

    fn lifecycle(&self) -> &RefreshLifecycle<Fetched<K, V>> {
        &self.lifecycle
    }

    fn task_label(&self) -> &'static str {
        "refresh_item"
    }

    fn capture(&self) -> Fetched<K, V> {
        self.entry()
    }

    async fn refresh(&self) -> CacheResult<()> {
        // The guard must be released before the upgraded handle can drop:
        // dropping the last handle destroys this item, which takes the lock.
        let collection = self.collection.lock().upgrade();
        let Some(collection) = collection else {
            return Ok(());
        };
        let fetcher = collection.fetcher();
        drop(collection);

        let key = self.key();
        debug!(?key, "refreshing cache item");
        let fetched = fetcher.fetch_one(&key).await?;

        if self.lifecycle.is_destroyed() {
            return Ok(());
        }
        *self.entry.lock() = fetched;
        Ok(())
    }
}

impl<K: fmt::Debug, V> fmt::Debug for CacheItem<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItem")
            .field("key", &self.entry.lock().key)
            .field("created_at", &self.lifecycle.created_at())
            .field("lifespan", &self.lifecycle.lifespan())
            .field("destroyed", &self.lifecycle.is_destroyed())
            .finish_non_exhaustive()
    }
}
