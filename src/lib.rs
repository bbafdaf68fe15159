//! refresh-cache - self-refreshing TTL cache
//!
//! Values are fetched on demand through a pluggable strategy and kept fresh
//! by timers that re-fetch them when their lifespan runs out.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and ports (`Clock`, `Fetcher`, `RequestExecutor`)
//! - **Service Layer** (`services`): scheduler, refresh lifecycle, items, collections and the store
//! - **Adapters** (`adapters`): reqwest executor and the templated HTTP fetcher
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use refresh_cache::{CacheCollection, Scheduler, SchedulerConfig, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scheduler = Arc::new(Scheduler::new(Arc::new(SystemClock), SchedulerConfig::default()));
//!     let driver = scheduler.start();
//!     let users = CacheCollection::new("users", my_fetcher(), scheduler.clone());
//!     let item = users.get_one(&1).await?;
//!     println!("{:?}", item.value());
//!     scheduler.stop();
//!     driver.await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::http::{json_fetcher, HttpFetcher, ReqwestExecutor};
pub use domain::errors::{CacheError, CacheResult};
pub use domain::models::{
    CacheKey, CollectionSettings, Config, Fetched, Lifespan, RefreshPolicy, RequestSpec,
    SchedulerConfig,
};
pub use domain::ports::{Clock, Fetcher, ManualClock, RequestExecutor, SystemClock};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CacheCollection, CacheItem, CacheStore, CachedRequest, RequestOptions, Scheduler,
};
