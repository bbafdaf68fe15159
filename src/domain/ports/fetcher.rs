use async_trait::async_trait;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::{FetchSchemeKind, Fetched};

/// Pluggable retrieval strategy used by collections to fill misses and by
/// items to refresh themselves.
///
/// Implementations report the key each value resolved to; collections
/// compare it with the requested key. Failures are returned as-is, there is
/// no retry.
#[async_trait]
pub trait Fetcher<K, V>: Send + Sync
where
    K: Send + Sync,
{
    /// Fetch a single value.
    async fn fetch_one(&self, key: &K) -> CacheResult<Fetched<K, V>>;

    /// Fetch several values with one call.
    async fn fetch_some(&self, _keys: &[K]) -> CacheResult<Vec<Fetched<K, V>>> {
        Err(CacheError::SchemeNotConfigured(FetchSchemeKind::FetchSome))
    }
}
