//! TTL-driven refresh lifecycle shared by every cacheable entity.
//!
//! Entities implement [`Refreshable`] and compose a [`RefreshLifecycle`]
//! that owns their timestamps, update counter, history and live refresh
//! task. The free functions here drive the cycle: [`activate`] schedules the
//! first refresh, [`run_refresh`] performs one and decides whether to
//! schedule the next. Scheduler callbacks only hold a `Weak` reference, so
//! dropping an entity never keeps it alive through its own timer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::scheduler::{task_fn, ScheduledTask, Scheduler};
use crate::domain::errors::CacheResult;
use crate::domain::models::{Lifespan, RefreshPolicy};

/// An entity with a lifespan that can refresh its own payload.
#[async_trait]
pub trait Refreshable: Send + Sync + 'static {
    /// Immutable copy of the payload kept in history.
    type Snapshot: Clone + Send + Sync + 'static;

    fn lifecycle(&self) -> &RefreshLifecycle<Self::Snapshot>;

    /// Label used to generate refresh task names.
    fn task_label(&self) -> &'static str;

    /// Copy the current payload for history.
    fn capture(&self) -> Self::Snapshot;

    /// Re-fetch the payload and replace it in place. Must leave the payload
    /// untouched on failure and when the entity was destroyed meanwhile.
    async fn refresh(&self) -> CacheResult<()>;
}

struct LifecycleState<S> {
    updated_at: DateTime<Utc>,
    update_task: Option<ScheduledTask>,
    update_count: u64,
    snapshots: BTreeMap<DateTime<Utc>, S>,
    destroyed: bool,
}

/// Timestamps, history and scheduling state of a refreshable entity.
pub struct RefreshLifecycle<S> {
    scheduler: Arc<Scheduler>,
    lifespan: Lifespan,
    policy: RefreshPolicy,
    created_at: DateTime<Utc>,
    state: Mutex<LifecycleState<S>>,
}

impl<S> RefreshLifecycle<S> {
    pub fn new(scheduler: Arc<Scheduler>, lifespan: Lifespan, policy: RefreshPolicy) -> Self {
        let created_at = scheduler.now();
        Self {
            scheduler,
            lifespan,
            policy,
            created_at,
            state: Mutex::new(LifecycleState {
                updated_at: created_at,
                update_task: None,
                update_count: 0,
                snapshots: BTreeMap::new(),
                destroyed: false,
            }),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn lifespan(&self) -> Lifespan {
        self.lifespan
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state.lock().updated_at
    }

    pub fn update_count(&self) -> u64 {
        self.state.lock().update_count
    }

    /// The refresh task currently attached, whatever its state.
    pub fn update_task(&self) -> Option<ScheduledTask> {
        self.state.lock().update_task.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Deadline of the live refresh task; without one, `created_at +
    /// lifespan`. `None` for an infinite lifespan.
    pub fn next_update_time(&self) -> Option<DateTime<Utc>> {
        if let Some(task) = self.state.lock().update_task.as_ref().filter(|t| t.is_pending()) {
            return Some(task.scheduled_at());
        }
        self.lifespan.deadline_after(self.created_at)
    }

    /// Abort the live task and release history. Returns false if the entity
    /// was already destroyed.
    pub fn destroy(&self) -> bool {
        let task = {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            state.destroyed = true;
            state.snapshots.clear();
            state.update_task.take()
        };
        if let Some(task) = task {
            self.scheduler.abort(&task);
        }
        true
    }

    fn record_update(&self) -> u64 {
        let now = self.scheduler.now();
        let mut state = self.state.lock();
        state.update_count += 1;
        state.updated_at = now;
        state.update_count
    }

    fn record_snapshot(&self, payload: S) {
        let mut state = self.state.lock();
        if !state.destroyed {
            let at = state.updated_at;
            state.snapshots.insert(at, payload);
        }
    }

    fn attach_task(&self, task: ScheduledTask) {
        let mut state = self.state.lock();
        if state.destroyed {
            drop(state);
            self.scheduler.abort(&task);
            return;
        }
        if task.is_pending() {
            state.update_task = Some(task);
        }
    }

    fn detach_task(&self) -> Option<ScheduledTask> {
        self.state.lock().update_task.take()
    }
}

impl<S: Clone> RefreshLifecycle<S> {
    /// History ordered by update time.
    pub fn snapshots(&self) -> Vec<(DateTime<Utc>, S)> {
        self.state
            .lock()
            .snapshots
            .iter()
            .map(|(at, payload)| (*at, payload.clone()))
            .collect()
    }
}

impl<S> Drop for RefreshLifecycle<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Take the initial snapshot (if history is kept) and schedule the first
/// refresh at `updated_at + lifespan`.
pub async fn activate<E: Refreshable>(entity: &Arc<E>) -> CacheResult<()> {
    let lifecycle = entity.lifecycle();
    if lifecycle.policy().keep_history {
        lifecycle.record_snapshot(entity.capture());
    }
    schedule_after(entity, lifecycle.updated_at()).await
}

/// Register the next refresh task at `from + lifespan`. No-op for destroyed
/// entities and infinite lifespans.
async fn schedule_after<E: Refreshable>(entity: &Arc<E>, from: DateTime<Utc>) -> CacheResult<()> {
    let lifecycle = entity.lifecycle();
    if lifecycle.is_destroyed() {
        return Ok(());
    }
    let Some(at) = lifecycle.lifespan().deadline_after(from) else {
        return Ok(());
    };

    let scheduler = Arc::clone(lifecycle.scheduler());
    let name = scheduler.next_name(entity.task_label());
    let weak = Arc::downgrade(entity);
    let callback = task_fn(move |_timing| async move {
        match weak.upgrade() {
            Some(entity) => run_refresh(entity).await,
            None => Ok(()),
        }
    });

    let task = scheduler.register(name, at, callback).await?;
    lifecycle.attach_task(task);
    Ok(())
}

/// Perform one refresh and run the post-update policy.
///
/// On success the update counter and `updated_at` advance, a snapshot is
/// taken if history is kept, and the next refresh is scheduled unless the
/// policy forbids it. On failure the payload and `updated_at` stay as they
/// were and the error is returned; the cycle only continues if the policy
/// asks to reschedule on failure.
pub fn run_refresh<E: Refreshable>(entity: Arc<E>) -> BoxFuture<'static, CacheResult<()>> {
    Box::pin(async move {
        let lifecycle = entity.lifecycle();
        if lifecycle.is_destroyed() {
            return Ok(());
        }

        match entity.refresh().await {
            Ok(()) => {
                if lifecycle.is_destroyed() {
                    debug!(label = entity.task_label(), "entity destroyed during refresh, result discarded");
                    return Ok(());
                }
                let count = lifecycle.record_update();
                let policy = lifecycle.policy();
                if policy.keep_history {
                    lifecycle.record_snapshot(entity.capture());
                }
                if policy.allows_another(count) {
                    schedule_after(&entity, lifecycle.updated_at()).await?;
                } else {
                    debug!(label = entity.task_label(), update_count = count, "refresh limit reached");
                }
                Ok(())
            }
            Err(err) => {
                warn!(label = entity.task_label(), error = %err, "refresh failed");
                if lifecycle.policy().reschedule_on_failure {
                    schedule_after(&entity, lifecycle.scheduler().now()).await?;
                }
                Err(err)
            }
        }
    })
}

/// Refresh immediately, cancelling the pending scheduled refresh first.
pub async fn force_refresh<E: Refreshable>(entity: &Arc<E>) -> CacheResult<()> {
    let lifecycle = entity.lifecycle();
    if let Some(task) = lifecycle.detach_task() {
        lifecycle.scheduler().abort(&task);
    }
    run_refresh(Arc::clone(entity)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CacheError;
    use crate::domain::models::{SchedulerConfig, TaskState};
    use crate::domain::ports::{Clock, ManualClock};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Counter {
        lifecycle: RefreshLifecycle<u64>,
        value: AtomicU64,
        fail: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Refreshable for Counter {
        type Snapshot = u64;

        fn lifecycle(&self) -> &RefreshLifecycle<u64> {
            &self.lifecycle
        }

        fn task_label(&self) -> &'static str {
            "refresh_counter"
        }

        fn capture(&self) -> u64 {
            self.value.load(Ordering::SeqCst)
        }

        async fn refresh(&self) -> CacheResult<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::fetch_failed("upstream down"));
            }
            if self.lifecycle.is_destroyed() {
                return Ok(());
            }
            self.value.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        scheduler: Arc<Scheduler>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::starting_now());
            let scheduler = Arc::new(Scheduler::new(clock.clone(), SchedulerConfig::default()));
            Self { clock, scheduler }
        }

        async fn counter(&self, lifespan: Lifespan, policy: RefreshPolicy) -> Arc<Counter> {
            self.counter_with_gate(lifespan, policy, None).await
        }

        async fn counter_with_gate(
            &self,
            lifespan: Lifespan,
            policy: RefreshPolicy,
            gate: Option<Arc<Notify>>,
        ) -> Arc<Counter> {
            let counter = Arc::new(Counter {
                lifecycle: RefreshLifecycle::new(self.scheduler.clone(), lifespan, policy),
                value: AtomicU64::new(0),
                fail: AtomicBool::new(false),
                gate,
            });
            activate(&counter).await.unwrap();
            counter
        }

        async fn advance(&self, ms: u64) -> usize {
            self.clock.advance(Duration::from_millis(ms));
            self.scheduler.tick().await
        }
    }

    #[tokio::test]
    async fn test_infinite_lifespan_never_schedules() {
        let fx = Fixture::new();
        let counter = fx.counter(Lifespan::Infinite, RefreshPolicy::default()).await;

        assert!(counter.lifecycle().update_task().is_none());
        assert_eq!(counter.lifecycle().next_update_time(), None);
        assert!(fx.scheduler.is_empty());
        assert_eq!(fx.advance(1_000_000).await, 0);
    }

    #[tokio::test]
    async fn test_refresh_cycle_reschedules_from_updated_at() {
        let fx = Fixture::new();
        let counter = fx.counter(Lifespan::from_millis(1000), RefreshPolicy::default()).await;
        let lifecycle = counter.lifecycle();
        let created_at = lifecycle.created_at();

        let first = lifecycle.update_task().unwrap();
        assert_eq!(first.scheduled_at(), created_at + chrono::Duration::milliseconds(1000));
        assert_eq!(lifecycle.next_update_time(), Some(first.scheduled_at()));

        assert_eq!(fx.advance(1000).await, 1);

        assert_eq!(first.state(), TaskState::Resolved);
        assert_eq!(lifecycle.update_count(), 1);
        assert!(lifecycle.updated_at() > created_at);
        assert_eq!(counter.capture(), 1);

        let second = lifecycle.update_task().unwrap();
        assert_eq!(second.state(), TaskState::Pending);
        assert_eq!(
            second.scheduled_at(),
            lifecycle.updated_at() + chrono::Duration::milliseconds(1000)
        );
    }

    #[tokio::test]
    async fn test_update_once_stops_after_first_refresh() {
        let fx = Fixture::new();
        let policy = RefreshPolicy { update_once: true, ..Default::default() };
        let counter = fx.counter(Lifespan::from_millis(100), policy).await;

        assert_eq!(fx.advance(100).await, 1);
        assert_eq!(fx.advance(100).await, 0);
        assert_eq!(counter.lifecycle().update_count(), 1);
        assert!(fx.scheduler.is_empty());
        // Falls back to created_at + lifespan once no task is live
        assert_eq!(
            counter.lifecycle().next_update_time(),
            Some(counter.lifecycle().created_at() + chrono::Duration::milliseconds(100))
        );
    }

    #[tokio::test]
    async fn test_max_updates_caps_refreshes() {
        let fx = Fixture::new();
        let policy = RefreshPolicy { max_updates: Some(2), ..Default::default() };
        let counter = fx.counter(Lifespan::from_millis(100), policy).await;

        for _ in 0..5 {
            fx.advance(100).await;
        }
        assert_eq!(counter.lifecycle().update_count(), 2);
        assert_eq!(counter.capture(), 2);
    }

    #[tokio::test]
    async fn test_history_keyed_by_updated_at() {
        let fx = Fixture::new();
        let policy = RefreshPolicy { keep_history: true, ..Default::default() };
        let counter = fx.counter(Lifespan::from_millis(100), policy).await;
        assert_eq!(counter.lifecycle().snapshots().len(), 1);

        fx.advance(100).await;
        fx.advance(100).await;

        let snapshots = counter.lifecycle().snapshots();
        let values: Vec<u64> = snapshots.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(snapshots.last().unwrap().0, counter.lifecycle().updated_at());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_state_and_stops() {
        let fx = Fixture::new();
        let counter = fx.counter(Lifespan::from_millis(100), RefreshPolicy::default()).await;
        let updated_before = counter.lifecycle().updated_at();
        counter.fail.store(true, Ordering::SeqCst);

        assert_eq!(fx.advance(100).await, 1);

        assert_eq!(counter.lifecycle().updated_at(), updated_before);
        assert_eq!(counter.lifecycle().update_count(), 0);
        assert_eq!(counter.capture(), 0);
        assert!(fx.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_reschedules_when_asked() {
        let fx = Fixture::new();
        let policy = RefreshPolicy { reschedule_on_failure: true, ..Default::default() };
        let counter = fx.counter(Lifespan::from_millis(100), policy).await;
        counter.fail.store(true, Ordering::SeqCst);

        fx.advance(150).await;
        let next = counter.lifecycle().update_task().unwrap();
        assert!(next.is_pending());
        assert_eq!(next.scheduled_at(), fx.clock.now() + chrono::Duration::milliseconds(100));

        counter.fail.store(false, Ordering::SeqCst);
        fx.advance(100).await;
        assert_eq!(counter.lifecycle().update_count(), 1);
    }

    #[tokio::test]
    async fn test_run_refresh_returns_failure() {
        let fx = Fixture::new();
        let counter = fx.counter(Lifespan::Infinite, RefreshPolicy::default()).await;
        counter.fail.store(true, Ordering::SeqCst);
        let err = run_refresh(counter.clone()).await.unwrap_err();
        assert_eq!(err, CacheError::FetchFailed("upstream down".into()));
    }

    #[tokio::test]
    async fn test_destroy_aborts_task_and_is_idempotent() {
        let fx = Fixture::new();
        let policy = RefreshPolicy { keep_history: true, ..Default::default() };
        let counter = fx.counter(Lifespan::from_millis(100), policy).await;
        let task = counter.lifecycle().update_task().unwrap();

        assert!(counter.lifecycle().destroy());
        assert!(!counter.lifecycle().destroy());
        assert_eq!(task.state(), TaskState::Aborted);
        assert!(counter.lifecycle().snapshots().is_empty());

        assert_eq!(fx.advance(500).await, 0);
        assert_eq!(counter.capture(), 0);
    }

    #[tokio::test]
    async fn test_destroy_during_refresh_discards_result() {
        let fx = Fixture::new();
        let gate = Arc::new(Notify::new());
        let counter = fx
            .counter_with_gate(Lifespan::Infinite, RefreshPolicy::default(), Some(gate.clone()))
            .await;

        let in_flight = tokio::spawn(run_refresh(counter.clone()));
        tokio::task::yield_now().await;
        counter.lifecycle().destroy();
        gate.notify_one();
        in_flight.await.unwrap().unwrap();

        assert_eq!(counter.capture(), 0);
        assert_eq!(counter.lifecycle().update_count(), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_pending_task() {
        let fx = Fixture::new();
        let counter = fx.counter(Lifespan::from_millis(1000), RefreshPolicy::default()).await;
        let scheduled = counter.lifecycle().update_task().unwrap();

        fx.clock.advance(Duration::from_millis(10));
        force_refresh(&counter).await.unwrap();

        assert_eq!(scheduled.state(), TaskState::Aborted);
        assert_eq!(counter.lifecycle().update_count(), 1);
        assert_eq!(fx.scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_entity_aborts_its_task() {
        let fx = Fixture::new();
        let counter = fx.counter(Lifespan::from_millis(100), RefreshPolicy::default()).await;
        let task = counter.lifecycle().update_task().unwrap();

        drop(counter);

        assert_eq!(task.state(), TaskState::Aborted);
        assert!(fx.scheduler.is_empty());
    }
}
