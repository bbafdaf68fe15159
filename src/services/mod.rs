//! Core cache engine: the task scheduler, the refresh lifecycle and the
//! entities built on it.

pub mod cache_collection;
pub mod cache_item;
pub mod cache_store;
pub mod cached_request;
pub mod refresh;
pub mod scheduler;

pub use cache_collection::CacheCollection;
pub use cache_item::CacheItem;
pub use cache_store::{CacheStore, CollectionSummary, JsonCollection, RequestOptions, StoreSize};
pub use cached_request::CachedRequest;
pub use refresh::{activate, force_refresh, run_refresh, RefreshLifecycle, Refreshable};
pub use scheduler::{task_fn, RegisterOptions, ScheduledTask, Scheduler, TaskCallback, TaskFuture};
