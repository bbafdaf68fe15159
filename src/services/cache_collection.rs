//! Keyed collection of cache items with single-flight fetching.
//!
//! A key is in one of three states: absent, in flight (a shared fetch future
//! is reserved under it) or ready. Reservations are made under the slot lock
//! before any await, so concurrent misses for the same key always join the
//! same fetch. Every reservation carries a generation number; a fetch only
//! caches its result if its reservation is still in place when it settles,
//! which keeps evicted keys from being resurrected by a late response.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::cache_item::CacheItem;
use super::refresh::activate;
use super::scheduler::Scheduler;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::{CollectionSettings, Fetched, SettingName, SettingValue};
use crate::domain::ports::Fetcher;

type ItemFetch<K, V> = Shared<BoxFuture<'static, CacheResult<Option<Arc<CacheItem<K, V>>>>>>;
type BatchFetch<K, V> = Shared<BoxFuture<'static, CacheResult<Arc<BatchOutcome<K, V>>>>>;

enum Slot<K, V> {
    Ready(Arc<CacheItem<K, V>>),
    InFlight { generation: u64, fetch: ItemFetch<K, V> },
}

/// Items produced by one batch fetch.
struct BatchOutcome<K, V> {
    requested: HashMap<K, Arc<CacheItem<K, V>>>,
    /// Items for keys nobody asked for, accepted when key mismatches are
    /// ignored.
    unrequested: Vec<Arc<CacheItem<K, V>>>,
}

enum Lookup<K, V> {
    Ready(Arc<CacheItem<K, V>>),
    Wait(ItemFetch<K, V>),
}

/// State shared by every handle of a collection and weakly referenced by its
/// items.
pub(crate) struct CollectionShared<K, V> {
    id: String,
    fetcher: Arc<dyn Fetcher<K, V>>,
    scheduler: Arc<Scheduler>,
    settings: Mutex<CollectionSettings>,
    slots: Mutex<HashMap<K, Slot<K, V>>>,
    generation: AtomicU64,
}

/// A named collection of cache items backed by a fetch strategy.
///
/// Cheap to clone; clones share the same items. Dropping the last handle
/// destroys every item and aborts their pending refreshes.
pub struct CacheCollection<K, V> {
    shared: Arc<CollectionShared<K, V>>,
}

impl<K, V> Clone for CacheCollection<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> CollectionShared<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn fetcher(&self) -> Arc<dyn Fetcher<K, V>> {
        Arc::clone(&self.fetcher)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    fn new_item(self: &Arc<Self>, fetched: Fetched<K, V>) -> Arc<CacheItem<K, V>> {
        let settings = *self.settings.lock();
        CacheItem::new(
            fetched,
            Arc::downgrade(self),
            Arc::clone(&self.scheduler),
            settings.default_item_lifespan,
            settings.item_policy(),
        )
    }

    /// Find `key`, or reserve it with a single-key fetch.
    fn lookup_or_reserve(self: &Arc<Self>, key: &K) -> Lookup<K, V> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(Slot::Ready(item)) => return Lookup::Ready(Arc::clone(item)),
            Some(Slot::InFlight { fetch, .. }) => return Lookup::Wait(fetch.clone()),
            None => {}
        }

        let generation = self.next_generation();
        let fetch = fetch_single(Arc::downgrade(self), key.clone(), generation)
            .boxed()
            .shared();
        slots.insert(
            key.clone(),
            Slot::InFlight {
                generation,
                fetch: fetch.clone(),
            },
        );
        Lookup::Wait(fetch)
    }

    /// Resolve every key against the slots and reserve all missing keys with
    /// one batch fetch.
    fn plan_batch(
        self: &Arc<Self>,
        keys: &[K],
    ) -> (Vec<Lookup<K, V>>, Option<BatchFetch<K, V>>) {
        let mut slots = self.slots.lock();
        let mut missing = Vec::new();
        let found: Vec<Option<Lookup<K, V>>> = keys
            .iter()
            .map(|key| match slots.get(key) {
                Some(Slot::Ready(item)) => Some(Lookup::Ready(Arc::clone(item))),
                Some(Slot::InFlight { fetch, .. }) => Some(Lookup::Wait(fetch.clone())),
                None => {
                    missing.push(key.clone());
                    None
                }
            })
            .collect();

        if missing.is_empty() {
            return (found.into_iter().flatten().collect(), None);
        }

        let generation = self.next_generation();
        let batch = fetch_batch(Arc::downgrade(self), missing.clone(), generation)
            .boxed()
            .shared();

        let mut per_key = HashMap::with_capacity(missing.len());
        for key in missing {
            let wanted = key.clone();
            let fetch: ItemFetch<K, V> = batch
                .clone()
                .map(move |outcome| outcome.map(|o| o.requested.get(&wanted).cloned()))
                .boxed()
                .shared();
            slots.insert(
                key.clone(),
                Slot::InFlight {
                    generation,
                    fetch: fetch.clone(),
                },
            );
            per_key.insert(key, fetch);
        }

        let lookups = keys
            .iter()
            .zip(found)
            .filter_map(|(key, lookup)| lookup.or_else(|| per_key.get(key).cloned().map(Lookup::Wait)))
            .collect();
        (lookups, Some(batch))
    }

    /// Remove the reservation on `key` if it is still ours.
    fn release(&self, slots: &mut HashMap<K, Slot<K, V>>, key: &K, generation: u64) -> bool {
        let ours = matches!(
            slots.get(key),
            Some(Slot::InFlight { generation: g, .. }) if *g == generation
        );
        if ours {
            slots.remove(key);
        }
        ours
    }

    fn release_all(&self, keys: &[K], generation: u64) {
        let mut slots = self.slots.lock();
        for key in keys {
            self.release(&mut slots, key, generation);
        }
    }

    /// Cache `item` under its own key, destroying whatever item it replaces.
    fn store(slots: &mut HashMap<K, Slot<K, V>>, item: &Arc<CacheItem<K, V>>) -> bool {
        let key = item.key();
        match slots.get(&key) {
            Some(Slot::InFlight { .. }) => false,
            _ => {
                if let Some(Slot::Ready(previous)) = slots.insert(key, Slot::Ready(Arc::clone(item))) {
                    previous.destroy();
                }
                true
            }
        }
    }
}

impl<K, V> Drop for CollectionShared<K, V> {
    fn drop(&mut self) {
        for (_, slot) in self.slots.get_mut().drain() {
            if let Slot::Ready(item) = slot {
                item.destroy();
            }
        }
    }
}

/// Fetch one key and settle its reservation.
async fn fetch_single<K, V>(
    shared: Weak<CollectionShared<K, V>>,
    key: K,
    generation: u64,
) -> CacheResult<Option<Arc<CacheItem<K, V>>>>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let (fetcher, id) = match shared.upgrade() {
        Some(shared) => (shared.fetcher(), shared.id.clone()),
        None => return Err(CacheError::CollectionNotFound(String::new())),
    };

    debug!(collection = %id, ?key, "fetching item");
    let result = fetcher.fetch_one(&key).await;
    let shared = shared
        .upgrade()
        .ok_or_else(|| CacheError::CollectionNotFound(id.clone()))?;

    let fetched = match result {
        Ok(fetched) => fetched,
        Err(err) => {
            shared.release_all(std::slice::from_ref(&key), generation);
            debug!(collection = %id, ?key, error = %err, "fetch failed");
            return Err(err);
        }
    };

    if fetched.key != key && !shared.settings.lock().ignore_key_mismatch {
        shared.release_all(std::slice::from_ref(&key), generation);
        return Err(CacheError::key_mismatch(&key, &fetched.key));
    }

    let item = shared.new_item(fetched);
    let cached = {
        let mut slots = shared.slots.lock();
        shared.release(&mut slots, &key, generation) && CollectionShared::store(&mut slots, &item)
    };

    if cached {
        activate(&item).await?;
    } else {
        debug!(collection = %id, ?key, "key evicted while in flight, item not cached");
        item.destroy();
    }
    Ok(Some(item))
}

/// Fetch several keys with one call and settle their reservations.
async fn fetch_batch<K, V>(
    shared: Weak<CollectionShared<K, V>>,
    keys: Vec<K>,
    generation: u64,
) -> CacheResult<Arc<BatchOutcome<K, V>>>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let (fetcher, id) = match shared.upgrade() {
        Some(shared) => (shared.fetcher(), shared.id.clone()),
        None => return Err(CacheError::CollectionNotFound(String::new())),
    };

    debug!(collection = %id, count = keys.len(), "fetching batch");
    let result = fetcher.fetch_some(&keys).await;
    let shared = shared
        .upgrade()
        .ok_or_else(|| CacheError::CollectionNotFound(id.clone()))?;

    let fetched = match result {
        Ok(fetched) => fetched,
        Err(err) => {
            shared.release_all(&keys, generation);
            debug!(collection = %id, error = %err, "batch fetch failed");
            return Err(err);
        }
    };

    let requested: HashSet<&K> = keys.iter().collect();
    let ignore_mismatch = shared.settings.lock().ignore_key_mismatch;
    if !ignore_mismatch {
        if let Some(stray) = fetched.iter().find(|f| !requested.contains(&f.key)) {
            shared.release_all(&keys, generation);
            return Err(CacheError::key_mismatch(&keys, &stray.key));
        }
    }

    // Last occurrence of a key wins, first occurrence fixes its position.
    let mut order: Vec<K> = Vec::new();
    let mut latest: HashMap<K, Fetched<K, V>> = HashMap::new();
    for entry in fetched {
        let key = entry.key.clone();
        if latest.insert(key.clone(), entry).is_none() {
            order.push(key);
        }
    }

    let mut outcome = BatchOutcome {
        requested: HashMap::new(),
        unrequested: Vec::new(),
    };
    let mut to_activate = Vec::new();
    {
        let mut slots = shared.slots.lock();
        for key in order {
            let Some(entry) = latest.remove(&key) else {
                continue;
            };
            let item = shared.new_item(entry);
            let was_requested = requested.contains(&key);
            let cached = if was_requested {
                shared.release(&mut slots, &key, generation)
                    && CollectionShared::store(&mut slots, &item)
            } else {
                CollectionShared::store(&mut slots, &item)
            };

            if cached {
                to_activate.push(Arc::clone(&item));
            } else {
                item.destroy();
            }
            if was_requested {
                outcome.requested.insert(key, item);
            } else {
                outcome.unrequested.push(item);
            }
        }
        // Requested keys missing from the response
        for key in &keys {
            shared.release(&mut slots, key, generation);
        }
    }

    for item in &to_activate {
        activate(item).await?;
    }
    debug!(
        collection = %id,
        fetched = outcome.requested.len(),
        unrequested = outcome.unrequested.len(),
        "batch settled"
    );
    Ok(Arc::new(outcome))
}

impl<K, V> CacheCollection<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(id: impl Into<String>, fetcher: Arc<dyn Fetcher<K, V>>, scheduler: Arc<Scheduler>) -> Self {
        Self::with_settings(id, fetcher, scheduler, CollectionSettings::default())
    }

    pub fn with_settings(
        id: impl Into<String>,
        fetcher: Arc<dyn Fetcher<K, V>>,
        scheduler: Arc<Scheduler>,
        settings: CollectionSettings,
    ) -> Self {
        let id = id.into();
        info!(collection = %id, "cache collection created");
        Self {
            shared: Arc::new(CollectionShared {
                id,
                fetcher,
                scheduler,
                settings: Mutex::new(settings),
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.shared.scheduler
    }

    /// Return the item for `key`, fetching it on a miss.
    ///
    /// Concurrent calls for the same key share one fetch. A cached item is
    /// returned as is, without refreshing it.
    pub async fn get_one(&self, key: &K) -> CacheResult<Arc<CacheItem<K, V>>> {
        loop {
            let fetch = match self.shared.lookup_or_reserve(key) {
                Lookup::Ready(item) => return Ok(item),
                Lookup::Wait(fetch) => fetch,
            };
            // A batch response without this key settles to None; the key is
            // free again, so retry with a single fetch.
            if let Some(item) = fetch.await? {
                return Ok(item);
            }
        }
    }

    /// Return items for `keys` in input order, fetching the missing ones.
    ///
    /// Missing keys are fetched with one batch call, or one by one when the
    /// collection fetches batches sequentially. Keys absent from a batch
    /// response are absent from the result. Unrequested items in a batch
    /// response are appended when key mismatches are ignored.
    pub async fn get_some(&self, keys: &[K]) -> CacheResult<Vec<Arc<CacheItem<K, V>>>> {
        let mut seen = HashSet::with_capacity(keys.len());
        let keys: Vec<K> = keys.iter().filter(|k| seen.insert(*k)).cloned().collect();

        if self.shared.settings.lock().fetch_batch_sequentially {
            let mut items = Vec::with_capacity(keys.len());
            for key in &keys {
                items.push(self.get_one(key).await?);
            }
            return Ok(items);
        }

        let (lookups, batch) = self.shared.plan_batch(&keys);
        let resolved = future::try_join_all(lookups.into_iter().map(|lookup| async move {
            match lookup {
                Lookup::Ready(item) => Ok(Some(item)),
                Lookup::Wait(fetch) => fetch.await,
            }
        }))
        .await?;

        let mut items: Vec<_> = resolved.into_iter().flatten().collect();
        if let Some(batch) = batch {
            let outcome = batch.await?;
            items.extend(outcome.unrequested.iter().cloned());
        }
        Ok(items)
    }

    /// Cached item for `key`, without fetching.
    pub fn get(&self, key: &K) -> Option<Arc<CacheItem<K, V>>> {
        match self.shared.slots.lock().get(key) {
            Some(Slot::Ready(item)) => Some(Arc::clone(item)),
            _ => None,
        }
    }

    /// Destroy and remove the item for `key`, or every item when `key` is
    /// `None`. In-flight fetches for the removed keys will not be cached.
    /// Returns how many items were removed.
    pub fn evict(&self, key: Option<&K>) -> CacheResult<usize> {
        let removed: Vec<Slot<K, V>> = {
            let mut slots = self.shared.slots.lock();
            match key {
                Some(key) => slots.remove(key).into_iter().collect(),
                None => slots.drain().map(|(_, slot)| slot).collect(),
            }
        };

        let mut count = 0;
        for slot in removed {
            if let Slot::Ready(item) = slot {
                item.destroy();
                count += 1;
            }
        }
        debug!(collection = %self.shared.id, count, "evicted items");
        Ok(count)
    }

    /// Number of cached items.
    pub fn size(&self) -> usize {
        self.shared
            .slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn contains(&self, key: &K) -> bool {
        matches!(self.shared.slots.lock().get(key), Some(Slot::Ready(_)))
    }

    /// Cached items with their keys.
    pub fn snapshot(&self) -> Vec<(K, Arc<CacheItem<K, V>>)> {
        self.shared
            .slots
            .lock()
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(item) => Some((key.clone(), Arc::clone(item))),
                Slot::InFlight { .. } => None,
            })
            .collect()
    }

    pub fn settings(&self) -> CollectionSettings {
        *self.shared.settings.lock()
    }

    /// Apply `f` to the settings. Affects items created afterwards.
    pub fn update_settings(&self, f: impl FnOnce(&mut CollectionSettings)) {
        f(&mut *self.shared.settings.lock());
    }

    /// Set a named setting, reporting unknown names and mistyped values.
    pub fn try_set_setting(&self, name: &str, value: impl Into<SettingValue>) -> CacheResult<()> {
        let name: SettingName = name.parse()?;
        self.shared.settings.lock().set(name, value.into())
    }

    /// Set a named setting. Returns whether it was applied.
    pub fn set_setting(&self, name: &str, value: impl Into<SettingValue>) -> bool {
        match self.try_set_setting(name, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(collection = %self.shared.id, error = %err, "setting rejected");
                false
            }
        }
    }

    pub fn get_setting(&self, name: &str) -> Option<SettingValue> {
        let name: SettingName = name.parse().ok()?;
        Some(self.shared.settings.lock().get(name))
    }
}

impl<K, V> fmt::Debug for CacheCollection<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCollection")
            .field("id", &self.shared.id)
            .field("slots", &self.shared.slots.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Lifespan, SchedulerConfig};
    use crate::domain::ports::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct MockFetcher {
        one_calls: AtomicUsize,
        some_calls: AtomicUsize,
        batches: Mutex<Vec<Vec<u32>>>,
        fail: AtomicBool,
        key_offset: AtomicU32,
        extra_key: Mutex<Option<u32>>,
        skip_key: Mutex<Option<u32>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockFetcher {
        fn gated() -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let fetcher = Self {
                gate: Some(gate.clone()),
                ..Default::default()
            };
            (fetcher, gate)
        }

        async fn pass_gate(&self) {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
        }
    }

    #[async_trait]
    impl Fetcher<u32, String> for MockFetcher {
        async fn fetch_one(&self, key: &u32) -> CacheResult<Fetched<u32, String>> {
            let call = self.one_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.pass_gate().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::fetch_failed("upstream unavailable"));
            }
            let key = key + self.key_offset.load(Ordering::SeqCst);
            Ok(Fetched::new(key, format!("{key}#{call}")))
        }

        async fn fetch_some(&self, keys: &[u32]) -> CacheResult<Vec<Fetched<u32, String>>> {
            self.some_calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().push(keys.to_vec());
            self.pass_gate().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::fetch_failed("upstream unavailable"));
            }
            let skip = *self.skip_key.lock();
            let mut out: Vec<_> = keys
                .iter()
                .filter(|k| Some(**k) != skip)
                .map(|k| Fetched::new(*k, format!("{k}#batch")))
                .collect();
            if let Some(extra) = *self.extra_key.lock() {
                out.push(Fetched::new(extra, format!("{extra}#batch")));
            }
            Ok(out)
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        scheduler: Arc<Scheduler>,
        fetcher: Arc<MockFetcher>,
        collection: CacheCollection<u32, String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(MockFetcher::default(), CollectionSettings::default())
        }

        fn with(fetcher: MockFetcher, settings: CollectionSettings) -> Self {
            let clock = Arc::new(ManualClock::starting_now());
            let scheduler = Arc::new(Scheduler::new(clock.clone(), SchedulerConfig::default()));
            let fetcher = Arc::new(fetcher);
            let collection =
                CacheCollection::with_settings("users", fetcher.clone(), scheduler.clone(), settings);
            Self {
                clock,
                scheduler,
                fetcher,
                collection,
            }
        }

        fn keys(items: &[Arc<CacheItem<u32, String>>]) -> Vec<u32> {
            items.iter().map(|item| item.key()).collect()
        }
    }

    #[tokio::test]
    async fn test_get_one_fetches_once_then_hits() {
        let fx = Fixture::new();

        let first = fx.collection.get_one(&5).await.unwrap();
        let second = fx.collection.get_one(&5).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.value(), "5#1");
        assert_eq!(fx.fetcher.one_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.collection.size(), 1);
        assert!(fx.collection.contains(&5));
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let (fetcher, gate) = MockFetcher::gated();
        let fx = Fixture::with(fetcher, CollectionSettings::default());

        let (a, b, ()) = tokio::join!(fx.collection.get_one(&5), fx.collection.get_one(&5), async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        });

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(fx.fetcher.one_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_mismatch_rejected_then_accepted_when_ignored() {
        let fx = Fixture::new();
        fx.fetcher.key_offset.store(1, Ordering::SeqCst);

        let err = fx.collection.get_one(&1).await.unwrap_err();
        assert!(matches!(err, CacheError::KeyMismatch { .. }));
        assert_eq!(fx.collection.size(), 0);

        assert!(fx.collection.set_setting("ignoreKeyMismatch", true));
        let item = fx.collection.get_one(&1).await.unwrap();
        assert_eq!(item.key(), 2);
        assert!(fx.collection.contains(&2));
        assert!(!fx.collection.contains(&1));
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_reservation() {
        let fx = Fixture::new();
        fx.fetcher.fail.store(true, Ordering::SeqCst);
        let err = fx.collection.get_one(&3).await.unwrap_err();
        assert_eq!(err, CacheError::FetchFailed("upstream unavailable".into()));
        assert_eq!(fx.collection.size(), 0);

        fx.fetcher.fail.store(false, Ordering::SeqCst);
        let item = fx.collection.get_one(&3).await.unwrap();
        assert_eq!(item.value(), "3#2");
    }

    #[tokio::test]
    async fn test_get_some_batches_misses_and_keeps_input_order() {
        let fx = Fixture::new();
        fx.collection.get_one(&2).await.unwrap();

        let items = fx.collection.get_some(&[3, 2, 1]).await.unwrap();

        assert_eq!(Fixture::keys(&items), vec![3, 2, 1]);
        assert_eq!(items[1].value(), "2#1");
        assert_eq!(fx.fetcher.some_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*fx.fetcher.batches.lock(), vec![vec![3, 1]]);
        assert_eq!(fx.collection.size(), 3);
    }

    #[tokio::test]
    async fn test_get_some_all_hits_skips_fetch() {
        let fx = Fixture::new();
        fx.collection.get_some(&[1, 2]).await.unwrap();
        let items = fx.collection.get_some(&[2, 1]).await.unwrap();
        assert_eq!(Fixture::keys(&items), vec![2, 1]);
        assert_eq!(fx.fetcher.some_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_some_sequential_uses_fetch_one() {
        let settings = CollectionSettings {
            fetch_batch_sequentially: true,
            ..Default::default()
        };
        let fx = Fixture::with(MockFetcher::default(), settings);

        let items = fx.collection.get_some(&[4, 1]).await.unwrap();

        assert_eq!(Fixture::keys(&items), vec![4, 1]);
        assert_eq!(fx.fetcher.one_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.fetcher.some_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_some_omits_keys_missing_from_response() {
        let fx = Fixture::new();
        *fx.fetcher.skip_key.lock() = Some(2);

        let items = fx.collection.get_some(&[1, 2, 3]).await.unwrap();

        assert_eq!(Fixture::keys(&items), vec![1, 3]);
        assert!(!fx.collection.contains(&2));

        // The key is free again for a single fetch
        let item = fx.collection.get_one(&2).await.unwrap();
        assert_eq!(item.key(), 2);
    }

    #[tokio::test]
    async fn test_get_some_unrequested_key() {
        let fx = Fixture::new();
        *fx.fetcher.extra_key.lock() = Some(99);

        let err = fx.collection.get_some(&[1, 2]).await.unwrap_err();
        assert!(matches!(err, CacheError::KeyMismatch { .. }));
        assert_eq!(fx.collection.size(), 0);

        fx.collection.update_settings(|s| s.ignore_key_mismatch = true);
        let items = fx.collection.get_some(&[1, 2]).await.unwrap();
        assert_eq!(Fixture::keys(&items), vec![1, 2, 99]);
        assert!(fx.collection.contains(&99));
    }

    #[tokio::test]
    async fn test_get_some_deduplicates_keys() {
        let fx = Fixture::new();
        let items = fx.collection.get_some(&[1, 1, 2]).await.unwrap();
        assert_eq!(Fixture::keys(&items), vec![1, 2]);
        assert_eq!(*fx.fetcher.batches.lock(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_get_one_joins_in_flight_batch() {
        let (fetcher, gate) = MockFetcher::gated();
        let fx = Fixture::with(fetcher, CollectionSettings::default());

        let (batch, single, ()) = tokio::join!(
            fx.collection.get_some(&[1, 2]),
            fx.collection.get_one(&2),
            async {
                tokio::task::yield_now().await;
                gate.add_permits(1);
            }
        );

        let batch = batch.unwrap();
        assert!(Arc::ptr_eq(&batch[1], &single.unwrap()));
        assert_eq!(fx.fetcher.one_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.fetcher.some_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evict() {
        let fx = Fixture::new();
        assert_eq!(fx.collection.evict(None).unwrap(), 0);

        let items = fx.collection.get_some(&[1, 2, 3]).await.unwrap();
        assert_eq!(fx.collection.evict(Some(&1)).unwrap(), 1);
        assert!(items[0].is_destroyed());
        assert_eq!(fx.collection.evict(Some(&1)).unwrap(), 0);

        assert_eq!(fx.collection.evict(None).unwrap(), 2);
        assert_eq!(fx.collection.size(), 0);
        assert!(items.iter().all(|item| item.is_destroyed()));

        assert_eq!(fx.collection.evict(None), Ok(0));
        assert_eq!(fx.collection.size(), 0);
    }

    #[tokio::test]
    async fn test_evict_during_fetch_does_not_cache() {
        let (fetcher, gate) = MockFetcher::gated();
        let fx = Fixture::with(fetcher, CollectionSettings::default());

        let (item, ()) = tokio::join!(fx.collection.get_one(&7), async {
            tokio::task::yield_now().await;
            assert_eq!(fx.collection.evict(Some(&7)).unwrap(), 0);
            gate.add_permits(1);
        });

        let item = item.unwrap();
        assert_eq!(item.key(), 7);
        assert!(item.is_destroyed());
        assert!(!fx.collection.contains(&7));
        assert!(fx.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_items_refresh_on_lifespan() {
        let settings = CollectionSettings {
            default_item_lifespan: Lifespan::from_millis(1000),
            ..Default::default()
        };
        let fx = Fixture::with(MockFetcher::default(), settings);
        let item = fx.collection.get_one(&1).await.unwrap();
        assert_eq!(item.value(), "1#1");
        assert_eq!(fx.scheduler.list_names(), vec!["refresh_item_0".to_string()]);

        fx.clock.advance(Duration::from_millis(1000));
        assert_eq!(fx.scheduler.tick().await, 1);

        assert_eq!(item.value(), "1#2");
        assert_eq!(item.update_count(), 1);
        assert_eq!(fx.scheduler.list_names(), vec!["refresh_item_1".to_string()]);
        assert!(Arc::ptr_eq(&item, &fx.collection.get(&1).unwrap()));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_value_and_stops() {
        let settings = CollectionSettings {
            default_item_lifespan: Lifespan::from_millis(100),
            ..Default::default()
        };
        let fx = Fixture::with(MockFetcher::default(), settings);
        let item = fx.collection.get_one(&1).await.unwrap();
        fx.fetcher.fail.store(true, Ordering::SeqCst);

        fx.clock.advance(Duration::from_millis(100));
        assert_eq!(fx.scheduler.tick().await, 1);

        assert_eq!(item.value(), "1#1");
        assert_eq!(item.update_count(), 0);
        assert!(fx.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_history_kept_when_enabled() {
        let settings = CollectionSettings {
            default_item_lifespan: Lifespan::from_millis(100),
            keep_item_history: true,
            max_item_updates: Some(1),
            ..Default::default()
        };
        let fx = Fixture::with(MockFetcher::default(), settings);
        let item = fx.collection.get_one(&1).await.unwrap();

        fx.clock.advance(Duration::from_millis(100));
        fx.scheduler.tick().await;

        let values: Vec<String> = item.snapshots().into_iter().map(|(_, f)| f.value).collect();
        assert_eq!(values, vec!["1#1".to_string(), "1#2".to_string()]);
        assert!(fx.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_collection_destroys_items() {
        let settings = CollectionSettings {
            default_item_lifespan: Lifespan::from_secs(60),
            ..Default::default()
        };
        let fx = Fixture::with(MockFetcher::default(), settings);
        let item = fx.collection.get_one(&1).await.unwrap();
        assert_eq!(fx.scheduler.len(), 1);

        let Fixture {
            scheduler, collection, ..
        } = fx;
        drop(collection);

        assert!(item.is_destroyed());
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_settings_boundary() {
        let fx = Fixture::new();

        assert!(fx.collection.set_setting("fetchBatchSequentially", true));
        assert_eq!(
            fx.collection.get_setting("fetch_batch_sequentially"),
            Some(SettingValue::Bool(true))
        );

        assert!(!fx.collection.set_setting("cacheEverything", true));
        assert_eq!(
            fx.collection.try_set_setting("cacheEverything", true),
            Err(CacheError::UnknownSetting("cacheEverything".into()))
        );
        assert_eq!(fx.collection.get_setting("cacheEverything"), None);

        let before = fx.collection.settings();
        let err = fx
            .collection
            .try_set_setting("defaultItemLifespan", true)
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidSettingValue { .. }));
        assert_eq!(fx.collection.settings(), before);

        fx.collection
            .try_set_setting("defaultItemLifespan", Lifespan::from_secs(5))
            .unwrap();
        assert_eq!(fx.collection.settings().default_item_lifespan, Lifespan::from_secs(5));
    }
}
