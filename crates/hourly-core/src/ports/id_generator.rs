//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock の時刻 + ランダム部で ULID を生成

use crate::domain::ids::TaskHandle;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は submission ごとの handle を生成
///
/// 複数スレッドから submit されるので `Send + Sync` を要求する。
pub trait IdGenerator: Send + Sync {
    fn generate_handle(&self) -> TaskHandle;
}

/// UlidGenerator は ULID ベースの ID 生成器
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_handle(&self) -> TaskHandle {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskHandle::from(ulid)
    }
}
