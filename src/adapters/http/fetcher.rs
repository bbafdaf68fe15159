//! HTTP fetch strategy.
//!
//! An [`HttpFetcher`] holds up to two schemes, one per fetch kind. Each
//! scheme renders a URI and optional payload from the call parameters
//! (`{key}` for single fetches, `{keys}` for batches), performs one request
//! and hands the decoded response to a translator that extracts keyed
//! values.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::template::{PayloadTemplate, UriTemplate};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::{
    CacheKey, FetchSchemeKind, Fetched, HttpMethod, RawResponse, RequestSpec, SchemeConfig,
};
use crate::domain::ports::{Fetcher, RequestExecutor};

/// Parameters of a single fetch, as seen by templates.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOneParams<K> {
    pub key: K,
}

/// Parameters of a batch fetch, as seen by templates.
#[derive(Debug, Clone, Serialize)]
pub struct FetchSomeParams<K> {
    pub keys: Vec<K>,
}

/// Turns a decoded response into the scheme's result.
pub type Translator<T> = Arc<dyn Fn(RawResponse) -> CacheResult<T> + Send + Sync>;

/// One request recipe: method, URI, payload and response translator.
pub struct FetchScheme<P, T> {
    pub method: HttpMethod,
    pub uri: UriTemplate<P>,
    pub payload: Option<PayloadTemplate<P>>,
    pub translator: Translator<T>,
}

impl<P, T> FetchScheme<P, T> {
    pub fn new(
        method: HttpMethod,
        uri: impl Into<UriTemplate<P>>,
        translator: impl Fn(RawResponse) -> CacheResult<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            uri: uri.into(),
            payload: None,
            translator: Arc::new(translator),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: PayloadTemplate<P>) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl<P, T> Clone for FetchScheme<P, T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            uri: self.uri.clone(),
            payload: self.payload.clone(),
            translator: Arc::clone(&self.translator),
        }
    }
}

impl<P, T> fmt::Debug for FetchScheme<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchScheme")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

pub type FetchOneScheme<K, V> = FetchScheme<FetchOneParams<K>, Fetched<K, V>>;
pub type FetchSomeScheme<K, V> = FetchScheme<FetchSomeParams<K>, Vec<Fetched<K, V>>>;

/// The schemes an [`HttpFetcher`] starts with.
pub struct FetcherConfig<K, V> {
    pub fetch_one: Option<FetchOneScheme<K, V>>,
    pub fetch_some: Option<FetchSomeScheme<K, V>>,
}

impl<K, V> Default for FetcherConfig<K, V> {
    fn default() -> Self {
        Self {
            fetch_one: None,
            fetch_some: None,
        }
    }
}

impl<K, V> Clone for FetcherConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            fetch_one: self.fetch_one.clone(),
            fetch_some: self.fetch_some.clone(),
        }
    }
}

/// Fetch strategy backed by HTTP requests.
pub struct HttpFetcher<K, V> {
    executor: Arc<dyn RequestExecutor>,
    schemes: RwLock<FetcherConfig<K, V>>,
}

impl<K, V> HttpFetcher<K, V>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(executor: Arc<dyn RequestExecutor>, config: FetcherConfig<K, V>) -> Self {
        Self {
            executor,
            schemes: RwLock::new(config),
        }
    }

    /// Replace (or remove, with `None`) the single-fetch scheme.
    pub fn set_fetch_one(&self, scheme: Option<FetchOneScheme<K, V>>) {
        self.schemes.write().fetch_one = scheme;
    }

    /// Replace (or remove, with `None`) the batch scheme.
    pub fn set_fetch_some(&self, scheme: Option<FetchSomeScheme<K, V>>) {
        self.schemes.write().fetch_some = scheme;
    }

    pub fn has_scheme(&self, kind: FetchSchemeKind) -> bool {
        let schemes = self.schemes.read();
        match kind {
            FetchSchemeKind::FetchOne => schemes.fetch_one.is_some(),
            FetchSchemeKind::FetchSome => schemes.fetch_some.is_some(),
        }
    }

    async fn perform<P: Serialize, T>(&self, scheme: FetchScheme<P, T>, params: P) -> CacheResult<T> {
        let url = scheme.uri.render(&params)?;
        let body = match &scheme.payload {
            Some(payload) => Some(payload.build(&params)),
            None if scheme.method == HttpMethod::Post => Some(Value::Object(serde_json::Map::new())),
            None => None,
        };
        let request = RequestSpec {
            method: scheme.method,
            url,
            body,
        };

        let response = self.executor.execute(&request).await?;
        (scheme.translator)(response)
    }
}

#[async_trait]
impl<K, V> Fetcher<K, V> for HttpFetcher<K, V>
where
    K: Serialize + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn fetch_one(&self, key: &K) -> CacheResult<Fetched<K, V>> {
        let scheme = self
            .schemes
            .read()
            .fetch_one
            .clone()
            .ok_or(CacheError::SchemeNotConfigured(FetchSchemeKind::FetchOne))?;
        debug!(?key, "http fetch_one");
        self.perform(scheme, FetchOneParams { key: key.clone() }).await
    }

    async fn fetch_some(&self, keys: &[K]) -> CacheResult<Vec<Fetched<K, V>>> {
        let scheme = self
            .schemes
            .read()
            .fetch_some
            .clone()
            .ok_or(CacheError::SchemeNotConfigured(FetchSchemeKind::FetchSome))?;
        debug!(count = keys.len(), "http fetch_some");
        self.perform(scheme, FetchSomeParams { keys: keys.to_vec() }).await
    }
}

impl<K, V> fmt::Debug for HttpFetcher<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemes = self.schemes.read();
        f.debug_struct("HttpFetcher")
            .field("fetch_one", &schemes.fetch_one)
            .field("fetch_some", &schemes.fetch_some)
            .finish_non_exhaustive()
    }
}

fn keyed(item: Value, key_field: &str) -> CacheResult<Fetched<CacheKey, Value>> {
    let key = item
        .get(key_field)
        .and_then(CacheKey::from_json)
        .ok_or_else(|| {
            CacheError::TranslationFailed(format!("missing or non-scalar key field '{key_field}'"))
        })?;
    Ok(Fetched::new(key, item))
}

/// Translator for single-object responses: the key is read from
/// `body[key_field]` and the whole body is the value.
pub fn json_field_translator(
    key_field: impl Into<String>,
) -> impl Fn(RawResponse) -> CacheResult<Fetched<CacheKey, Value>> + Send + Sync + 'static {
    let key_field = key_field.into();
    move |response| keyed(response.body, &key_field)
}

/// Translator for batch responses: the item array is the body itself, or
/// `body[items_field]` when given; each item is keyed by `item[key_field]`.
pub fn json_array_translator(
    key_field: impl Into<String>,
    items_field: Option<String>,
) -> impl Fn(RawResponse) -> CacheResult<Vec<Fetched<CacheKey, Value>>> + Send + Sync + 'static {
    let key_field = key_field.into();
    move |response| {
        let items = match &items_field {
            Some(field) => response.body.get(field).cloned().unwrap_or(Value::Null),
            None => response.body,
        };
        let Value::Array(items) = items else {
            return Err(CacheError::TranslationFailed(format!(
                "expected an array of items{}",
                items_field.as_ref().map(|f| format!(" in '{f}'")).unwrap_or_default()
            )));
        };
        items.into_iter().map(|item| keyed(item, &key_field)).collect()
    }
}

/// Build a JSON fetcher from declarative scheme configuration.
pub fn json_fetcher(
    executor: Arc<dyn RequestExecutor>,
    fetch_one: Option<&SchemeConfig>,
    fetch_some: Option<&SchemeConfig>,
) -> HttpFetcher<CacheKey, Value> {
    let fetch_one = fetch_one.map(|scheme| {
        let mut built = FetchScheme::new(
            scheme.method,
            scheme.uri.as_str(),
            json_field_translator(scheme.key_field.clone()),
        );
        built.payload = scheme.payload.clone().map(PayloadTemplate::Static);
        built
    });
    let fetch_some = fetch_some.map(|scheme| {
        let mut built = FetchScheme::new(
            scheme.method,
            scheme.uri.as_str(),
            json_array_translator(scheme.key_field.clone(), scheme.items_field.clone()),
        );
        built.payload = scheme.payload.clone().map(PayloadTemplate::Static);
        built
    });
    HttpFetcher::new(executor, FetcherConfig { fetch_one, fetch_some })
}
