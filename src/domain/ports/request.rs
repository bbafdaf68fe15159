use async_trait::async_trait;

use crate::domain::errors::CacheResult;
use crate::domain::models::{RawResponse, RequestSpec};

/// Performs one HTTP request and decodes its JSON body.
///
/// Non-2xx statuses and transport failures are `FetchFailed`; a body that is
/// not JSON is `TranslationFailed`.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &RequestSpec) -> CacheResult<RawResponse>;
}
