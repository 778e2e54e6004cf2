//! TaskRunner - ワーカープールでの非同期実行
//!
//! Runs caller-supplied work off the calling thread on a fixed-size pool and
//! delivers exactly one outcome per submission to the host's
//! `CallbackContext`.
//!
//! # Limitations
//! - Timeouts cut off *visibility* of a result. Work that is already running
//!   keeps running; its late result is discarded.
//! - Cancellation is cooperative. Queued work is skipped; running work can
//!   poll [`cancellation_requested`] but is never preempted.

mod config;
mod state;
mod worker;

pub use self::config::RunnerConfig;
pub use self::state::TaskState;
pub use self::worker::cancellation_requested;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use self::state::TaskSlot;
use self::worker::WorkerGroup;
use crate::domain::{BoxError, RunnerError, TaskError, TaskHandle};
use crate::observability::RunnerCounts;
use crate::ports::{Callback, CallbackContext, IdGenerator, SystemClock, UlidGenerator};

/// Builds the error callback for a submission; shared by the worker, the
/// deadline timer and shutdown.
type Failer = Arc<dyn Fn(TaskError) -> Callback + Send + Sync>;

/// Caller callbacks. Taken exactly once by whichever path settles first.
struct Completion<T> {
    on_success: Box<dyn FnOnce(T) + Send>,
    on_error: Box<dyn FnOnce(TaskError) + Send>,
}

type SharedCompletion<T> = Arc<Mutex<Option<Completion<T>>>>;

fn resolve<T>(completion: &SharedCompletion<T>, outcome: Result<T, TaskError>) {
    // ロックを外してからユーザーのコールバックを呼ぶ
    let taken = completion.lock().take();
    if let Some(completion) = taken {
        match outcome {
            Ok(value) => (completion.on_success)(value),
            Err(err) => (completion.on_error)(err),
        }
    }
}

/// Result of running one work item, not yet delivered.
pub(crate) struct Settlement {
    state: TaskState,
    callback: Callback,
}

/// A queued submission.
pub(crate) struct Job {
    handle: TaskHandle,
    slot: Arc<TaskSlot>,
    run: Box<dyn FnOnce() -> Settlement + Send>,
    fail: Failer,
}

/// Handle table entry.
#[derive(Clone)]
struct InFlight {
    slot: Arc<TaskSlot>,
    fail: Failer,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    aborted: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn record(&self, state: TaskState) {
        let counter = match state {
            TaskState::Succeeded => &self.succeeded,
            TaskState::Failed => &self.failed,
            TaskState::TimedOut => &self.timed_out,
            TaskState::Cancelled => &self.cancelled,
            TaskState::Aborted => &self.aborted,
            TaskState::Queued | TaskState::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, in_flight: usize) -> RunnerCounts {
        RunnerCounts {
            submitted: self.submitted.load(Ordering::Relaxed),
            in_flight,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the runner and its workers.
pub(crate) struct Shared {
    context: Arc<dyn CallbackContext>,
    table: Mutex<HashMap<TaskHandle, InFlight>>,
    counters: Counters,
}

impl Shared {
    /// Settle a submission. Only the first caller wins: it removes the handle
    /// from the table and dispatches `callback` (if any) to the context.
    fn settle(
        &self,
        handle: &TaskHandle,
        slot: &TaskSlot,
        to: TaskState,
        callback: Option<Callback>,
    ) -> bool {
        if !slot.settle(to) {
            return false;
        }
        self.table.lock().remove(handle);
        self.counters.record(to);
        if let Some(callback) = callback {
            self.context.dispatch(callback);
        }
        true
    }
}

/// Fixed-size worker pool with callback delivery to a designated context.
///
/// # 使用例
/// ```ignore
/// let (context, mut callbacks) = ChannelContext::new();
/// let runner = TaskRunner::start(RunnerConfig::default_v1(), Arc::new(context));
/// runner.submit(|| cache.get_report(), show_report, show_error)?;
/// while callbacks.next().await {}
/// ```
pub struct TaskRunner {
    shared: Arc<Shared>,
    sender: RwLock<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Option<WorkerGroup>>,
    runtime: Handle,
    ids: Arc<dyn IdGenerator>,
    config: RunnerConfig,
}

impl TaskRunner {
    /// Spawn the worker pool on the current tokio runtime.
    ///
    /// # Panics
    /// When called outside of a tokio runtime.
    pub fn start(config: RunnerConfig, context: Arc<dyn CallbackContext>) -> Self {
        Self::start_with_ids(config, context, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn start_with_ids(
        config: RunnerConfig,
        context: Arc<dyn CallbackContext>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let runtime = Handle::current();
        let shared = Arc::new(Shared {
            context,
            table: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let pool_size = config.effective_pool_size();
        let workers = WorkerGroup::spawn(&runtime, pool_size, rx, Arc::clone(&shared));
        tracing::debug!(pool_size, "task runner started");

        Self {
            shared,
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(Some(workers)),
            runtime,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Queue `work` for execution. Never blocks.
    ///
    /// Exactly one of `on_success` / `on_error` later runs on the callback
    /// context, unless the submission is cancelled first.
    pub fn submit<T, E, F, S, R>(
        &self,
        work: F,
        on_success: S,
        on_error: R,
    ) -> Result<TaskHandle, RunnerError>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        R: FnOnce(TaskError) + Send + 'static,
    {
        self.enqueue(work, None, on_success, on_error)
    }

    /// Like [`submit`](Self::submit), but `on_error(TaskError::Timeout)` fires if
    /// no result was observed within `timeout` of submission. A result that
    /// arrives later is dropped.
    pub fn submit_with_timeout<T, E, F, S, R>(
        &self,
        work: F,
        timeout: Duration,
        on_success: S,
        on_error: R,
    ) -> Result<TaskHandle, RunnerError>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        R: FnOnce(TaskError) + Send + 'static,
    {
        self.enqueue(work, Some(timeout), on_success, on_error)
    }

    /// Cancel an in-flight submission. No callback fires for it afterwards.
    ///
    /// Returns `false` (and does nothing) when the submission already settled.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let entry = self.shared.table.lock().get(handle).cloned();
        let Some(entry) = entry else {
            return false;
        };
        let cancelled = self
            .shared
            .settle(handle, &entry.slot, TaskState::Cancelled, None);
        if cancelled {
            tracing::debug!(%handle, "submission cancelled");
        }
        cancelled
    }

    /// Number of submissions that have not settled yet.
    pub fn in_flight(&self) -> usize {
        self.shared.table.lock().len()
    }

    pub fn counts(&self) -> RunnerCounts {
        self.shared.counters.snapshot(self.in_flight())
    }

    /// Stop accepting work, let queued and running work finish for up to
    /// `drain_timeout`, then force-terminate the workers.
    ///
    /// Submissions still pending after the drain window settle with
    /// `TaskError::ShutDown`. Calling this again is a no-op.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let workers = self.workers.lock().take();
        let Some(mut workers) = workers else {
            tracing::debug!("task runner already shut down");
            return;
        };

        // sender を drop するとキューが閉じ、ワーカーは残りを処理してから抜ける
        self.sender.write().take();
        tracing::info!(in_flight = self.in_flight(), ?drain_timeout, "shutting down task runner");

        if workers.join_within(drain_timeout).await {
            tracing::debug!("task runner drained");
            return;
        }

        workers.abort();
        let leftovers: Vec<(TaskHandle, InFlight)> = self
            .shared
            .table
            .lock()
            .iter()
            .map(|(handle, entry)| (*handle, entry.clone()))
            .collect();

        let mut aborted = 0usize;
        for (handle, entry) in leftovers {
            let callback = (entry.fail)(TaskError::ShutDown);
            if self
                .shared
                .settle(&handle, &entry.slot, TaskState::Aborted, Some(callback))
            {
                aborted += 1;
            }
        }
        tracing::warn!(aborted, "drain timeout elapsed, task runner force-terminated");
    }

    fn enqueue<T, E, F, S, R>(
        &self,
        work: F,
        timeout: Option<Duration>,
        on_success: S,
        on_error: R,
    ) -> Result<TaskHandle, RunnerError>
    where
        T: Send + 'static,
        E: Into<BoxError> + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        R: FnOnce(TaskError) + Send + 'static,
    {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RunnerError::ShutDown);
        };

        let handle = self.ids.generate_handle();
        let slot = Arc::new(TaskSlot::new());
        let completion: SharedCompletion<T> = Arc::new(Mutex::new(Some(Completion {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        })));

        let fail: Failer = {
            let completion = Arc::clone(&completion);
            Arc::new(move |err: TaskError| -> Callback {
                let completion = Arc::clone(&completion);
                Box::new(move || resolve(&completion, Err(err)))
            })
        };

        self.shared.table.lock().insert(
            handle,
            InFlight {
                slot: Arc::clone(&slot),
                fail: Arc::clone(&fail),
            },
        );

        let job = Job {
            handle,
            slot: Arc::clone(&slot),
            run: Box::new(move || execute(work, completion)),
            fail: Arc::clone(&fail),
        };
        if sender.send(job).is_err() {
            // ワーカーが全滅している（受信側が drop 済み）
            self.shared.table.lock().remove(&handle);
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RunnerError::ShutDown);
        }
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if let Some(after) = timeout {
            let shared = Arc::clone(&self.shared);
            self.runtime.spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(after) => {
                        let callback = fail(TaskError::Timeout { after });
                        if shared.settle(&handle, &slot, TaskState::TimedOut, Some(callback)) {
                            tracing::warn!(%handle, ?after, "submission timed out");
                        }
                    }
                    _ = slot.wait_settled() => {}
                }
            });
        }

        tracing::debug!(%handle, ?timeout, "submission queued");
        Ok(handle)
    }
}

/// Run the work on the current (blocking) thread and prepare its callback.
/// Panics are captured so the thread survives.
fn execute<T, E, F>(work: F, completion: SharedCompletion<T>) -> Settlement
where
    T: Send + 'static,
    E: Into<BoxError>,
    F: FnOnce() -> Result<T, E>,
{
    let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::Execution(err.into())),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    };

    let state = if outcome.is_ok() {
        TaskState::Succeeded
    } else {
        TaskState::Failed
    };

    Settlement {
        state,
        callback: Box::new(move || resolve(&completion, outcome)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
