//! Per-submission state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Submission state.
///
/// State transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> Failed
/// - Queued | Running -> TimedOut (deadline passed before a result was observed)
/// - Queued | Running -> Cancelled (caller cancelled; no callback)
/// - Queued | Running -> Aborted (runner force-terminated at shutdown)
///
/// Exactly one transition into a terminal state succeeds; whoever wins it owns
/// the (single) callback delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskState {
    /// Waiting for a free worker.
    Queued = 0,

    /// Work is executing on a blocking thread.
    Running = 1,

    /// Work returned a value; `on_success` was dispatched.
    Succeeded = 2,

    /// Work returned an error or panicked; `on_error` was dispatched.
    Failed = 3,

    /// Deadline passed first; `on_error(Timeout)` was dispatched.
    TimedOut = 4,

    /// Cancelled by the caller; nothing was dispatched.
    Cancelled = 5,

    /// Pending when the runner was force-terminated; `on_error(ShutDown)` was dispatched.
    Aborted = 6,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Queued | TaskState::Running)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Queued,
            1 => TaskState::Running,
            2 => TaskState::Succeeded,
            3 => TaskState::Failed,
            4 => TaskState::TimedOut,
            5 => TaskState::Cancelled,
            _ => TaskState::Aborted,
        }
    }
}

/// Shared state cell for one submission.
///
/// Held by the runner's handle table, the queued job, the deadline timer and
/// the blocking thread running the work.
#[derive(Debug)]
pub(crate) struct TaskSlot {
    state: AtomicU8,
    settled: Notify,
}

impl TaskSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Queued as u8),
            settled: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Queued -> Running. Fails when the submission already settled
    /// (cancelled or timed out while waiting for a worker).
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(
                TaskState::Queued as u8,
                TaskState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move into a terminal state. Returns `true` for exactly one caller.
    pub(crate) fn settle(&self, to: TaskState) -> bool {
        debug_assert!(to.is_terminal());
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if TaskState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.settled.notify_waiters();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Resolves once the submission reached a terminal state.
    pub(crate) async fn wait_settled(&self) {
        // notified() は作成時点から notify_waiters を受け取れる
        let notified = self.settled.notified();
        if self.state().is_terminal() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn queued_slot_can_start_once() {
        let slot = TaskSlot::new();
        assert_eq!(slot.state(), TaskState::Queued);
        assert!(slot.start());
        assert!(!slot.start());
        assert_eq!(slot.state(), TaskState::Running);
    }

    #[test]
    fn settled_slot_refuses_start_and_second_settle() {
        let slot = TaskSlot::new();
        assert!(slot.settle(TaskState::Cancelled));
        assert!(!slot.start());
        assert!(!slot.settle(TaskState::Succeeded));
        assert_eq!(slot.state(), TaskState::Cancelled);
    }

    #[test]
    fn only_one_concurrent_settle_wins() {
        let slot = Arc::new(TaskSlot::new());
        assert!(slot.start());
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = [TaskState::Succeeded, TaskState::TimedOut, TaskState::Cancelled]
            .into_iter()
            .cycle()
            .take(12)
            .map(|to| {
                let slot = Arc::clone(&slot);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if slot.settle(to) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(slot.state().is_terminal());
    }

    #[tokio::test]
    async fn wait_settled_wakes_on_settle() {
        let slot = Arc::new(TaskSlot::new());
        let waiter = tokio::spawn({
            let slot = Arc::clone(&slot);
            async move { slot.wait_settled().await }
        });

        tokio::task::yield_now().await;
        assert!(slot.settle(TaskState::Failed));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // すでに終端状態ならすぐ返る
        slot.wait_settled().await;
    }
}
