//! ChannelContext - チャネル経由のコールバック配送
//!
//! # 実装詳細
//! - 送信側（ChannelContext）は runner に渡す
//! - 受信側（CallbackLoop）はホストが自分のスレッドで回す
//! - 受信側は 1 つだけなので、コールバックは直列に実行される

use tokio::sync::mpsc;

use crate::ports::{Callback, CallbackContext};

/// Sending half: hands callbacks over to the host's loop.
#[derive(Clone)]
pub struct ChannelContext {
    tx: mpsc::UnboundedSender<Callback>,
}

impl ChannelContext {
    /// Create a context and the loop that must be driven on the host's
    /// designated thread.
    pub fn new() -> (Self, CallbackLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, CallbackLoop { rx })
    }
}

impl CallbackContext for ChannelContext {
    fn dispatch(&self, callback: Callback) {
        // ループ側が先に終了していたら捨てるしかない
        if self.tx.send(callback).is_err() {
            tracing::debug!("callback loop is gone, dropping callback");
        }
    }
}

/// Receiving half: runs callbacks one at a time on whichever thread drives it.
pub struct CallbackLoop {
    rx: mpsc::UnboundedReceiver<Callback>,
}

impl CallbackLoop {
    /// Run every callback already queued without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }

    /// Wait for the next callback and run it.
    ///
    /// Returns `false` once every `ChannelContext` has been dropped and the
    /// queue is empty.
    pub async fn next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Drive the loop on a dedicated (non-async) thread until all senders are
    /// dropped. Returns how many callbacks ran.
    pub fn blocking_run(mut self) -> usize {
        let mut ran = 0;
        while let Some(callback) = self.rx.blocking_recv() {
            callback();
            ran += 1;
        }
        ran
    }
}
