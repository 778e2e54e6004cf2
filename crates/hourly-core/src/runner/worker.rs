use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::state::TaskSlot;
use super::{Job, Shared};
use crate::domain::TaskError;

thread_local! {
    /// Slot of the work item currently running on this blocking thread.
    static CURRENT_SLOT: RefCell<Option<Arc<TaskSlot>>> = const { RefCell::new(None) };
}

/// Whether the work item running on the current thread has been abandoned
/// (cancelled, timed out, or aborted by shutdown).
///
/// Work cannot be preempted; long-running work should poll this and return
/// early. Always `false` outside of a runner work item.
pub fn cancellation_requested() -> bool {
    CURRENT_SLOT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|slot| slot.state().is_terminal())
    })
}

/// Binds a slot to the current thread for the duration of one work item.
struct SlotScope;

impl SlotScope {
    fn enter(slot: Arc<TaskSlot>) -> Self {
        CURRENT_SLOT.with(|current| *current.borrow_mut() = Some(slot));
        SlotScope
    }
}

impl Drop for SlotScope {
    fn drop(&mut self) {
        CURRENT_SLOT.with(|current| current.borrow_mut().take());
    }
}

/// Worker group handle.
/// - キューの送信側を drop するとワーカーは残りを処理してから止まる
/// - `join_within()` で終了を待ち、`abort()` で強制終了
pub(crate) struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one FIFO queue.
    pub(crate) fn spawn(
        runtime: &Handle,
        n: usize,
        queue: mpsc::UnboundedReceiver<Job>,
        shared: Arc<Shared>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let s = Arc::clone(&shared);

            let join = runtime.spawn(async move {
                worker_loop(worker_id, q, s).await;
            });
            joins.push(join);
        }

        Self { joins }
    }

    /// Wait for every worker to exit. Returns `false` if `drain` elapsed first.
    pub(crate) async fn join_within(&mut self, drain: Duration) -> bool {
        let joined = tokio::time::timeout(drain, async {
            for join in self.joins.iter_mut() {
                let _ = join.await;
            }
        })
        .await;
        joined.is_ok()
    }

    /// Stop every worker at its next await point.
    /// Work already handed to a blocking thread runs to completion unobserved.
    pub(crate) fn abort(&self) {
        for join in &self.joins {
            join.abort();
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    shared: Arc<Shared>,
) {
    loop {
        // 受信ロックは recv の間だけ保持する
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            tracing::debug!(worker_id, "queue closed, worker exiting");
            break;
        };

        let Job {
            handle,
            slot,
            run,
            fail,
        } = job;

        // 待機中に cancel / timeout されたものは実行しない
        if !slot.start() {
            tracing::debug!(worker_id, %handle, state = ?slot.state(), "skipping settled submission");
            continue;
        }

        let scope_slot = Arc::clone(&slot);
        let joined = tokio::task::spawn_blocking(move || {
            let _scope = SlotScope::enter(scope_slot);
            run()
        })
        .await;

        // ワーカーはブロッキング処理の完了まで待つ（並列度 = pool_size を守る）
        let settled = match joined {
            Ok(settlement) => shared.settle(&handle, &slot, settlement.state, Some(settlement.callback)),
            Err(err) => {
                let callback = fail(TaskError::Panicked(err.to_string()));
                shared.settle(&handle, &slot, super::TaskState::Failed, Some(callback))
            }
        };

        if !settled {
            tracing::debug!(worker_id, %handle, state = ?slot.state(), "discarding result of settled submission");
        }
    }
}
