//! CallbackContext port - 結果を届ける実行コンテキスト
//!
//! The host decides where completion callbacks run (typically its UI thread).
//! The runner hands every callback to this port and never runs one on its
//! own worker threads.

/// A completion callback ready to run on the designated context.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Designated destination for completion callbacks.
///
/// Implementations must run callbacks one at a time, in the order they were
/// dispatched.
pub trait CallbackContext: Send + Sync {
    fn dispatch(&self, callback: Callback);
}
