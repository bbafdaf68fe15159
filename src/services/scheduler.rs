//! Named, time-triggered task registry.
//!
//! Every delayed execution in the cache goes through a `Scheduler`: tasks
//! are registered under a unique ASCII `[A-Za-z0-9_]+` name with a
//! deadline, armed on a min-heap of timers and fired either by `tick`
//! (manual, deterministic) or by the background driver started with
//! `start`. A task fires at most once
//! and never before its deadline; aborting it disarms its timer.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::models::{SchedulerConfig, TaskState, TaskTiming};
use crate::domain::ports::Clock;

static TASK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("task name pattern is valid"));

/// Future produced by a task callback.
pub type TaskFuture = BoxFuture<'static, CacheResult<()>>;

/// One-shot callback run when a task fires.
pub type TaskCallback = Box<dyn FnOnce(TaskTiming) -> TaskFuture + Send>;

/// Wrap an async closure as a task callback.
pub fn task_fn<F, Fut>(f: F) -> TaskCallback
where
    F: FnOnce(TaskTiming) -> Fut + Send + 'static,
    Fut: Future<Output = CacheResult<()>> + Send + 'static,
{
    Box::new(move |timing| Box::pin(f(timing)))
}

/// Options for `Scheduler::register_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Replace (and abort) a live task registered under the same name.
    pub overwrite: bool,
}

struct TaskInner {
    name: String,
    created_at: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    state: Mutex<TaskState>,
    callback: Mutex<Option<TaskCallback>>,
    armed: AtomicBool,
    completion: watch::Sender<Option<TaskTiming>>,
}

/// Handle to a registered task. Clones share the same task.
#[derive(Clone)]
pub struct ScheduledTask {
    inner: Arc<TaskInner>,
}

impl ScheduledTask {
    fn new(
        name: String,
        created_at: DateTime<Utc>,
        scheduled_at: DateTime<Utc>,
        callback: TaskCallback,
    ) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            inner: Arc::new(TaskInner {
                name,
                created_at,
                scheduled_at,
                state: Mutex::new(TaskState::Pending),
                callback: Mutex::new(Some(callback)),
                armed: AtomicBool::new(false),
                completion,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.inner.scheduled_at
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TaskState::Pending
    }

    /// Resolves with the task's timing once it has been executed and its
    /// callback has returned. Never resolves for an aborted task.
    pub fn completion(&self) -> impl Future<Output = TaskTiming> + Send + 'static {
        let mut rx = self.inner.completion.subscribe();
        async move {
            let resolved = match rx.wait_for(Option::is_some).await {
                Ok(timing) => *timing,
                Err(_) => None,
            };
            match resolved {
                Some(timing) => timing,
                None => std::future::pending().await,
            }
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn arm(&self) {
        self.inner.armed.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.inner.armed.store(false, Ordering::SeqCst);
    }

    fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// `Pending -> to`. Returns false if the task was already terminal.
    fn settle(&self, to: TaskState) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = to;
        true
    }

    fn take_callback(&self) -> Option<TaskCallback> {
        self.inner.callback.lock().take()
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.inner.name)
            .field("created_at", &self.inner.created_at)
            .field("scheduled_at", &self.inner.scheduled_at)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Armed timer. Ordered so that `BinaryHeap` pops the earliest deadline
/// first, ties broken by arming order.
struct TimerEntry {
    at: DateTime<Utc>,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Registry of named tasks plus the timer queue that fires them.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// Live (pending) tasks by name.
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    timers: Mutex<BinaryHeap<TimerEntry>>,
    timer_seq: AtomicU64,
    sequences: Mutex<HashMap<String, u64>>,
    wake: Notify,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            clock,
            config,
            tasks: Mutex::new(HashMap::new()),
            timers: Mutex::new(BinaryHeap::new()),
            timer_seq: AtomicU64::new(0),
            sequences: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Next name in a labelled sequence: `label_0`, `label_1`, ...
    pub fn next_name(&self, label: &str) -> String {
        let mut sequences = self.sequences.lock();
        let counter = sequences.entry(label.to_string()).or_insert(0);
        let name = format!("{label}_{counter}");
        *counter += 1;
        name
    }

    /// Register a task without overwriting.
    pub async fn register(
        &self,
        name: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        callback: TaskCallback,
    ) -> CacheResult<ScheduledTask> {
        self.register_with(name, scheduled_at, callback, RegisterOptions::default())
            .await
    }

    /// Register a task.
    ///
    /// A task already due (`scheduled_at <= now`) is executed before this
    /// returns; its callback's failure is returned as the error.
    pub async fn register_with(
        &self,
        name: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        callback: TaskCallback,
        options: RegisterOptions,
    ) -> CacheResult<ScheduledTask> {
        let name = name.into();
        if !TASK_NAME.is_match(&name) {
            return Err(CacheError::InvalidTaskName(name));
        }

        let now = self.clock.now();
        let task = ScheduledTask::new(name.clone(), now, scheduled_at, callback);

        let replaced = {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(&name) && !options.overwrite {
                return Err(CacheError::DuplicateTaskName(name));
            }
            tasks.insert(name.clone(), task.clone())
        };
        if let Some(previous) = replaced {
            if previous.settle(TaskState::Aborted) {
                self.discard(&previous);
            }
            debug!(task = %name, "overwrote pending task");
        }

        if scheduled_at <= now {
            debug!(task = %name, %scheduled_at, "task already due, executing immediately");
            self.execute(&task).await?;
            return Ok(task);
        }

        task.arm();
        let seq = self.timer_seq.fetch_add(1, Ordering::SeqCst);
        self.timers.lock().push(TimerEntry {
            at: scheduled_at,
            seq,
            task: task.clone(),
        });
        self.wake.notify_one();
        debug!(task = %name, %scheduled_at, "task registered");

        Ok(task)
    }

    /// Run a task now.
    ///
    /// Disarms its timer, marks it resolved, runs the callback and then
    /// wakes awaiters. Returns `Ok(None)` if the task was already terminal.
    pub async fn execute(&self, task: &ScheduledTask) -> CacheResult<Option<TaskTiming>> {
        task.disarm();
        if !task.settle(TaskState::Resolved) {
            return Ok(None);
        }
        self.forget(task);

        let timing = TaskTiming {
            created_at: task.created_at(),
            scheduled_at: task.scheduled_at(),
            executed_at: self.clock.now(),
        };
        let result = match task.take_callback() {
            Some(callback) => callback(timing).await,
            None => Ok(()),
        };
        task.inner.completion.send_replace(Some(timing));

        result.map(|()| Some(timing))
    }

    /// Cancel a task. Idempotent: on a task that already fired or was
    /// aborted this changes nothing.
    ///
    /// Always returns `true`; after the call the task can no longer fire.
    pub fn abort(&self, task: &ScheduledTask) -> bool {
        task.disarm();
        if task.settle(TaskState::Aborted) {
            self.forget(task);
            self.discard(task);
            debug!(task = %task.name(), "task aborted");
        }
        true
    }

    /// Look up a live task by name.
    pub fn lookup(&self, name: &str) -> Option<ScheduledTask> {
        self.tasks.lock().get(name).cloned()
    }

    /// Names of all live tasks, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest deadline among armed timers.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let mut timers = self.timers.lock();
        loop {
            let (at, armed) = match timers.peek() {
                Some(entry) => (entry.at, entry.task.is_armed()),
                None => return None,
            };
            if armed {
                return Some(at);
            }
            timers.pop();
        }
    }

    /// Fire every armed timer whose deadline has passed, earliest first.
    ///
    /// Returns how many tasks fired. A failing callback is logged and does
    /// not stop the remaining tasks.
    pub async fn tick(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now();
            let due = {
                let mut timers = self.timers.lock();
                let is_due = timers.peek().is_some_and(|entry| entry.at <= now);
                if is_due {
                    timers.pop()
                } else {
                    None
                }
            };
            let Some(entry) = due else { break };
            if !entry.task.is_armed() {
                continue;
            }

            fired += 1;
            if let Err(err) = self.execute(&entry.task).await {
                warn!(task = %entry.task.name(), error = %err, "scheduled task failed");
            }
        }
        fired
    }

    /// Spawn the driver loop that fires timers against the scheduler's clock.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            info!("scheduler driver started");
            let idle = Duration::from_millis(scheduler.config.idle_tick_ms);

            while scheduler.running.load(Ordering::SeqCst) {
                let wait = scheduler.next_deadline().map_or(idle, |at| {
                    (at - scheduler.clock.now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(idle)
                });

                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = scheduler.wake.notified() => {}
                }

                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }
                scheduler.tick().await;
            }
            info!("scheduler driver stopped");
        })
    }

    /// Stop the driver loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drop a settled task from the live registry, unless the name has
    /// already been taken over by another task.
    /// Drop an aborted task's callback and timer entry.
    fn discard(&self, task: &ScheduledTask) {
        task.disarm();
        drop(task.take_callback());
        self.timers.lock().retain(|entry| !entry.task.ptr_eq(task));
    }

    fn forget(&self, task: &ScheduledTask) {
        let mut tasks = self.tasks.lock();
        if tasks.get(task.name()).is_some_and(|live| live.ptr_eq(task)) {
            tasks.remove(task.name());
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("live_tasks", &self.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
