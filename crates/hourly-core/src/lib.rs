//! hourly-core
//!
//! Core building blocks for the time tracker's background work.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, report, errors）
//! - **ports**: 抽象化レイヤー（TaskRepository, TimeLogRepository, CallbackContext, Clock, IdGenerator）
//! - **runner**: TaskRunner（固定サイズのワーカープール、timeout、cancel）
//! - **cache**: AggregateCache（double-checked locking による集計キャッシュ）
//! - **impls**: 実装（ChannelContext, InMemory リポジトリ）
//! - **observability**: カウンタのスナップショット

pub mod cache;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod runner;

pub use cache::AggregateCache;
pub use runner::{RunnerConfig, TaskRunner, cancellation_requested};
