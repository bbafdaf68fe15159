//! Memoized HTTP request that re-issues itself on its lifespan.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::refresh::{activate, RefreshLifecycle, Refreshable};
use super::scheduler::Scheduler;
use crate::domain::errors::CacheResult;
use crate::domain::models::{Lifespan, RawResponse, RefreshPolicy, RequestSpec};
use crate::domain::ports::RequestExecutor;

/// A request together with its latest response.
pub struct CachedRequest {
    key: String,
    spec: RequestSpec,
    lifecycle: RefreshLifecycle<RawResponse>,
    response: Mutex<RawResponse>,
    executor: Arc<dyn RequestExecutor>,
}

impl CachedRequest {
    /// Perform `spec` once and start refreshing it every `lifespan`.
    pub async fn fetch(
        key: impl Into<String>,
        spec: RequestSpec,
        executor: Arc<dyn RequestExecutor>,
        scheduler: Arc<Scheduler>,
        lifespan: Lifespan,
        policy: RefreshPolicy,
    ) -> CacheResult<Arc<Self>> {
        let key = key.into();
        debug!(request = %key, url = %spec.url, "performing request");
        let response = executor.execute(&spec).await?;

        let request = Arc::new(Self {
            key,
            spec,
            lifecycle: RefreshLifecycle::new(scheduler, lifespan, policy),
            response: Mutex::new(response),
            executor,
        });
        activate(&request).await?;
        Ok(request)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub fn response(&self) -> RawResponse {
        self.response.lock().clone()
    }

    pub fn body(&self) -> serde_json::Value {
        self.response.lock().body.clone()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.lifecycle.updated_at()
    }

    pub fn update_count(&self) -> u64 {
        self.lifecycle.update_count()
    }

    pub fn next_update_time(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.next_update_time()
    }

    pub fn snapshots(&self) -> Vec<(DateTime<Utc>, RawResponse)> {
        self.lifecycle.snapshots()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_destroyed()
    }

    pub fn destroy(&self) -> bool {
        self.lifecycle.destroy()
    }
}

#[async_trait]
impl Refreshable for CachedRequest {
    type Snapshot = RawResponse;

    fn lifecycle(&self) -> &RefreshLifecycle<RawResponse> {
        &self.lifecycle
    }

    fn task_label(&self) -> &'static str {
        "refresh_request"
    }

    fn capture(&self) -> RawResponse {
        self.response()
    }

    async fn refresh(&self) -> CacheResult<()> {
        let response = self.executor.execute(&self.spec).await?;
        if !self.lifecycle.is_destroyed() {
            *self.response.lock() = response;
        }
        Ok(())
    }
}

impl fmt::Debug for CachedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRequest")
            .field("key", &self.key)
            .field("spec", &self.spec)
            .field("lifespan", &self.lifecycle.lifespan())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CountingExecutor;
    use super::*;
    use crate::domain::models::SchedulerConfig;
    use crate::domain::ports::ManualClock;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn setup() -> (Arc<ManualClock>, Arc<Scheduler>, Arc<CountingExecutor>) {
        let clock = Arc::new(ManualClock::starting_now());
        let scheduler = Arc::new(Scheduler::new(clock.clone(), SchedulerConfig::default()));
        (clock, scheduler, Arc::new(CountingExecutor::default()))
    }

    #[tokio::test]
    async fn test_fetch_stores_response() {
        let (_clock, scheduler, executor) = setup();
        let request = CachedRequest::fetch(
            "users",
            RequestSpec::get("http://api/users"),
            executor.clone(),
            scheduler.clone(),
            Lifespan::Infinite,
            RefreshPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(request.key(), "users");
        assert_eq!(request.response().status, 200);
        assert_eq!(request.body(), json!({"url": "http://api/users", "call": 1}));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_request_reissued_on_lifespan() {
        let (clock, scheduler, executor) = setup();
        let policy = RefreshPolicy {
            keep_history: true,
            ..Default::default()
        };
        let request = CachedRequest::fetch(
            "users",
            RequestSpec::get("http://api/users"),
            executor.clone(),
            scheduler.clone(),
            Lifespan::from_secs(30),
            policy,
        )
        .await
        .unwrap();

        clock.advance(Duration::from_secs(30));
        assert_eq!(scheduler.tick().await, 1);

        assert_eq!(request.body()["call"], 2);
        assert_eq!(request.update_count(), 1);
        assert_eq!(request.snapshots().len(), 2);
        assert_eq!(
            request.next_update_time(),
            Some(request.updated_at() + chrono::Duration::seconds(30))
        );
    }

    #[tokio::test]
    async fn test_failed_initial_request_is_returned() {
        let (_clock, scheduler, executor) = setup();
        executor.fail.store(true, Ordering::SeqCst);
        let err = CachedRequest::fetch(
            "users",
            RequestSpec::get("http://api/users"),
            executor,
            scheduler,
            Lifespan::from_secs(1),
            RefreshPolicy::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_transport());
    }
}
