//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部の協力者（レコードストア、UI スレッド、時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod callback;
pub mod clock;
pub mod id_generator;
pub mod repository;

pub use self::callback::{Callback, CallbackContext};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::repository::{TaskRepository, TimeLogRepository};
