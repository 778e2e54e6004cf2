//! Impls - ports の実装（ホスト・テスト用）
//!
//! # 含まれる実装
//! - **ChannelContext / CallbackLoop**: チャネル経由のコールバック配送
//! - **InMemoryTaskRepository / InMemoryTimeLogRepository**: メモリ上のレコードストア

pub mod channel_context;
pub mod in_memory;

pub use self::channel_context::{CallbackLoop, ChannelContext};
pub use self::in_memory::{InMemoryTaskRepository, InMemoryTimeLogRepository};
