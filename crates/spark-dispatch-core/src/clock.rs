//! 可注入的墙钟抽象。
//!
//! - **意图 (Why)**：端口分配记录需要落盘的时间戳与 TTL 到期判断，测试必须能够手动推进时间；
//! - **契约 (What)**：`now_millis` 返回 Unix 毫秒时间戳，实现必须 `Send + Sync`；
//! - **注意 (Trade-offs)**：使用墙钟而非单调时钟，是为了让快照中的时间戳在重启后依旧可比较，
//!   代价是系统时间回拨会让 TTL 推迟到期。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 抽象时钟，提供毫秒粒度的当前时间。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前 Unix 毫秒时间戳。
    fn now_millis(&self) -> u64;
}

/// 基于 [`SystemTime`] 的生产时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// 手动推进的虚拟时钟，克隆体共享同一时间轴。
///
/// ### 教案式说明
/// - **意图 (Why)**：TTL 相关测试需要确定性的时间推进，避免 `sleep` 引入抖动；
/// - **契约 (What)**：`advance` 只增不减，`set` 可跳到任意时间点。
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// 以指定起点构造虚拟时钟。
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    /// 推进虚拟时间。
    pub fn advance(&self, delta: Duration) {
        let delta = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(delta, Ordering::AcqRel);
    }

    /// 直接设置当前时间。
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_timeline() {
        let clock = ManualClock::new(1_000);
        let observer = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(observer.now_millis(), 1_250);
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.now_millis() > 0);
    }
}
