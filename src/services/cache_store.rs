//! Registry of named JSON collections and memoized requests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::cache_collection::CacheCollection;
use super::cached_request::CachedRequest;
use super::refresh::force_refresh;
use super::scheduler::Scheduler;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::{
    CacheKey, CollectionSettings, Lifespan, RefreshPolicy, RequestSpec,
};
use crate::domain::ports::{Fetcher, RequestExecutor};

/// Collection of JSON values keyed by [`CacheKey`].
pub type JsonCollection = CacheCollection<CacheKey, Value>;

/// Options for [`CacheStore::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Cache key; defaults to the request's fingerprint.
    pub key: Option<String>,
    /// Re-issue the request even if a response is cached.
    pub force_fetch: bool,
    /// Refresh interval of a newly cached request.
    pub lifespan: Option<Lifespan>,
}

/// Id and item count of a registered collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub id: String,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreSize {
    pub collections: usize,
    pub requests: usize,
}

/// Named collections and cached requests sharing one scheduler.
pub struct CacheStore {
    id: String,
    scheduler: Arc<Scheduler>,
    executor: Arc<dyn RequestExecutor>,
    collections: Mutex<HashMap<String, JsonCollection>>,
    requests: Mutex<HashMap<String, Arc<CachedRequest>>>,
}

impl CacheStore {
    pub fn new(
        id: impl Into<String>,
        scheduler: Arc<Scheduler>,
        executor: Arc<dyn RequestExecutor>,
    ) -> Self {
        Self {
            id: id.into(),
            scheduler,
            executor,
            collections: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Register a collection. An existing collection with the same id is
    /// returned unchanged; without an id a fresh one is generated.
    pub fn register_collection(
        &self,
        id: Option<&str>,
        fetcher: Arc<dyn Fetcher<CacheKey, Value>>,
        settings: CollectionSettings,
    ) -> JsonCollection {
        let id = id.map_or_else(|| Uuid::new_v4().simple().to_string(), str::to_string);
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(&id) {
            debug!(store = %self.id, collection = %id, "collection already registered");
            return existing.clone();
        }

        let collection =
            CacheCollection::with_settings(id.clone(), fetcher, Arc::clone(&self.scheduler), settings);
        collections.insert(id, collection.clone());
        collection
    }

    pub fn collection(&self, id: &str) -> CacheResult<JsonCollection> {
        self.collections
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::CollectionNotFound(id.to_string()))
    }

    /// Evict every item of a collection and unregister it.
    pub fn drop_collection(&self, id: &str) -> bool {
        let removed = self.collections.lock().remove(id);
        match removed {
            Some(collection) => {
                let evicted = collection.evict(None).unwrap_or_default();
                info!(store = %self.id, collection = %id, evicted, "collection dropped");
                true
            }
            None => false,
        }
    }

    /// Drop every collection, evicting their items. Returns how many
    /// collections were dropped.
    pub fn drop_collections(&self) -> usize {
        let drained: Vec<JsonCollection> =
            self.collections.lock().drain().map(|(_, c)| c).collect();
        let evicted: usize = drained
            .iter()
            .map(|collection| collection.evict(None).unwrap_or_default())
            .sum();
        if !drained.is_empty() {
            info!(store = %self.id, collections = drained.len(), evicted, "collections dropped");
        }
        drained.len()
    }

    /// Summaries of all collections, sorted by id.
    pub fn collections(&self) -> Vec<CollectionSummary> {
        let mut summaries: Vec<CollectionSummary> = self
            .collections
            .lock()
            .values()
            .map(|c| CollectionSummary {
                id: c.id().to_string(),
                size: c.size(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn size(&self) -> StoreSize {
        StoreSize {
            collections: self.collections.lock().len(),
            requests: self.requests.lock().len(),
        }
    }

    /// Return the cached request for `spec`, performing and caching it on a
    /// miss. With `force_fetch` a cached request is re-issued first.
    pub async fn request(
        &self,
        spec: RequestSpec,
        options: RequestOptions,
    ) -> CacheResult<Arc<CachedRequest>> {
        let key = options.key.unwrap_or_else(|| spec.fingerprint());

        let cached = self.requests.lock().get(&key).cloned();
        if let Some(cached) = cached {
            if options.force_fetch {
                force_refresh(&cached).await?;
            }
            return Ok(cached);
        }

        let request = CachedRequest::fetch(
            key.clone(),
            spec,
            Arc::clone(&self.executor),
            Arc::clone(&self.scheduler),
            options.lifespan.unwrap_or_default(),
            RefreshPolicy::default(),
        )
        .await?;

        let mut requests = self.requests.lock();
        if let Some(existing) = requests.get(&key) {
            // A concurrent call cached the same request first
            request.destroy();
            return Ok(Arc::clone(existing));
        }
        requests.insert(key, Arc::clone(&request));
        Ok(request)
    }

    pub fn drop_request(&self, key: &str) -> bool {
        match self.requests.lock().remove(key) {
            Some(request) => request.destroy(),
            None => false,
        }
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        self.drop_collections();
        for (_, request) in self.requests.get_mut().drain() {
            request.destroy();
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("id", &self.id)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Fetched, SchedulerConfig};
    use crate::domain::ports::ManualClock;
    use crate::services::cached_request::test_support::CountingExecutor;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    struct EchoFetcher;

    #[async_trait]
    impl Fetcher<CacheKey, Value> for EchoFetcher {
        async fn fetch_one(&self, key: &CacheKey) -> CacheResult<Fetched<CacheKey, Value>> {
            Ok(Fetched::new(key.clone(), json!({ "id": key })))
        }
    }

    fn store() -> (CacheStore, Arc<CountingExecutor>) {
        let clock = Arc::new(ManualClock::starting_now());
        let scheduler = Arc::new(Scheduler::new(clock, SchedulerConfig::default()));
        let executor = Arc::new(CountingExecutor::default());
        (CacheStore::new("main", scheduler, executor.clone()), executor)
    }

    #[tokio::test]
    async fn test_register_collection_is_idempotent_by_id() {
        let (store, _) = store();
        let users = store.register_collection(Some("users"), Arc::new(EchoFetcher), CollectionSettings::default());
        users.get_one(&CacheKey::Int(1)).await.unwrap();

        let again = store.register_collection(Some("users"), Arc::new(EchoFetcher), CollectionSettings::default());
        assert_eq!(again.size(), 1);

        let generated = store.register_collection(None, Arc::new(EchoFetcher), CollectionSettings::default());
        assert_eq!(generated.id().len(), 32);
        assert_eq!(store.size(), StoreSize { collections: 2, requests: 0 });
    }

    #[tokio::test]
    async fn test_collection_lookup_and_drop() {
        let (store, _) = store();
        let users = store.register_collection(Some("users"), Arc::new(EchoFetcher), CollectionSettings::default());
        let item = users.get_one(&CacheKey::from("ann")).await.unwrap();

        assert_eq!(
            store.collections(),
            vec![CollectionSummary { id: "users".into(), size: 1 }]
        );
        assert!(store.collection("users").is_ok());
        assert_eq!(
            store.collection("posts").unwrap_err(),
            CacheError::CollectionNotFound("posts".into())
        );

        assert!(store.drop_collection("users"));
        assert!(!store.drop_collection("users"));
        assert!(item.is_destroyed());
        assert!(store.collections().is_empty());
    }

    #[tokio::test]
    async fn test_drop_collections() {
        let (store, _) = store();
        let mut items = Vec::new();
        for id in ["a", "b", "c"] {
            let collection = store.register_collection(Some(id), Arc::new(EchoFetcher), CollectionSettings::default());
            items.push(collection.get_one(&CacheKey::Int(1)).await.unwrap());
        }
        assert_eq!(store.drop_collections(), 3);
        assert_eq!(store.size().collections, 0);
        assert!(items.iter().all(|item| item.is_destroyed()));
        assert_eq!(store.drop_collections(), 0);
    }

    #[tokio::test]
    async fn test_request_memoized_by_fingerprint() {
        let (store, executor) = store();
        let spec = RequestSpec::get("http://api/stats");

        let first = store.request(spec.clone(), RequestOptions::default()).await.unwrap();
        let second = store.request(spec.clone(), RequestOptions::default()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.key(), spec.fingerprint());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.size().requests, 1);
    }

    #[tokio::test]
    async fn test_request_explicit_key_and_force_fetch() {
        let (store, executor) = store();
        let options = RequestOptions {
            key: Some("stats".into()),
            ..Default::default()
        };
        let cached = store
            .request(RequestSpec::get("http://api/stats"), options.clone())
            .await
            .unwrap();
        assert_eq!(cached.body()["call"], 1);

        let forced = store
            .request(
                RequestSpec::get("http://api/stats"),
                RequestOptions {
                    force_fetch: true,
                    ..options
                },
            )
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&cached, &forced));
        assert_eq!(forced.body()["call"], 2);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        assert!(store.drop_request("stats"));
        assert!(cached.is_destroyed());
    }
}
