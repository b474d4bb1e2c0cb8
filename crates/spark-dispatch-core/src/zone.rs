//! # 延迟分区分类器（Latency Zone Classifier）
//!
//! ## 核心意图（Why）
//! - 每个操作的墙钟耗时都要与所属分区的静态上限比较，超限只计数、不拦截；
//! - 违规计数与利用率读数是外部编排器唯一关心的两个数字，因此分类器是纯观测原语。
//!
//! ## 行为契约（What）
//! - `classify`：`measured > ceiling` 判定为违规，并对该分区计数器加一；等于上限视为达标；
//! - 未配置的分区一律视为达标，只输出 `debug` 日志，绝不返回错误；
//! - `utilization`：最近一次发布的 0.0–1.0 比值，发布时自动夹取到合法区间；
//! - `reset`：唯一的清零入口，属于管理操作。
//!
//! ## 实现策略（How）
//! - 上限表在构造后不可变，因此计数器直接挂在 `BTreeMap` 的值上，读写只需原子操作；
//! - 利用率以 `f64::to_bits` 存入 `AtomicU64`，避免引入锁。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::ids::ZoneName;

/// 单次分类的结论。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZoneVerdict {
    /// 耗时未超过分区上限。
    InBound,
    /// 耗时超过分区上限，已计入违规计数。
    Violation,
}

impl ZoneVerdict {
    /// 是否为违规。
    pub fn is_violation(self) -> bool {
        matches!(self, ZoneVerdict::Violation)
    }
}

#[derive(Debug)]
struct ZoneSlot {
    ceiling: Duration,
    violations: AtomicU64,
}

/// 单个分区的计数快照。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ZoneTally {
    pub zone: ZoneName,
    pub ceiling_ns: u64,
    pub violations: u64,
}

/// 全部分区计数与利用率的一致性读数，供外部编排器轮询。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZoneReport {
    pub utilization: f64,
    pub zones: Vec<ZoneTally>,
}

/// 延迟分区分类器。
///
/// # 教案式注释
/// - **意图 (Why)**：以显式对象替代进程级全局计数器，测试可各自实例化互不干扰；
/// - **契约 (What)**：`Send + Sync`，通常包裹在 `Arc` 中注入解析器与门面；
/// - **风险 (Trade-offs)**：分区集合在构造后固定，新增分区需要重建实例（计数随之清零）。
#[derive(Debug)]
pub struct ZoneClassifier {
    zones: BTreeMap<ZoneName, ZoneSlot>,
    utilization_bits: AtomicU64,
}

impl ZoneClassifier {
    /// 根据上限表构造分类器；重复的分区名以最后一次出现为准。
    pub fn new<I, Z>(ceilings: I) -> Self
    where
        I: IntoIterator<Item = (Z, Duration)>,
        Z: Into<ZoneName>,
    {
        let zones = ceilings
            .into_iter()
            .map(|(zone, ceiling)| {
                (
                    zone.into(),
                    ZoneSlot {
                        ceiling,
                        violations: AtomicU64::new(0),
                    },
                )
            })
            .collect();
        Self {
            zones,
            utilization_bits: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// 将一次测得的耗时与分区上限比较，违规时计数加一。
    pub fn classify(&self, zone: &str, measured: Duration) -> ZoneVerdict {
        let Some(slot) = self.zones.get(zone) else {
            debug!(zone, ?measured, "unknown latency zone, treating as in-bound");
            return ZoneVerdict::InBound;
        };
        if measured > slot.ceiling {
            let total = slot.violations.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                zone,
                ?measured,
                ceiling = ?slot.ceiling,
                total,
                "latency zone violation"
            );
            ZoneVerdict::Violation
        } else {
            ZoneVerdict::InBound
        }
    }

    /// 读取分区违规计数；未知分区返回 0。
    pub fn violations(&self, zone: &str) -> u64 {
        self.zones
            .get(zone)
            .map_or(0, |slot| slot.violations.load(Ordering::Relaxed))
    }

    /// 读取分区上限。
    pub fn ceiling(&self, zone: &str) -> Option<Duration> {
        self.zones.get(zone).map(|slot| slot.ceiling)
    }

    /// 是否配置了该分区。
    pub fn contains(&self, zone: &str) -> bool {
        self.zones.contains_key(zone)
    }

    /// 发布利用率读数；非有限值按 0 处理，其余夹取到 `[0.0, 1.0]`。
    pub fn publish_utilization(&self, ratio: f64) {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.utilization_bits
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    /// 最近一次发布的利用率。
    pub fn utilization(&self) -> f64 {
        f64::from_bits(self.utilization_bits.load(Ordering::Relaxed))
    }

    /// 汇总全部分区计数，按分区名排序。
    pub fn report(&self) -> ZoneReport {
        let zones = self
            .zones
            .iter()
            .map(|(zone, slot)| ZoneTally {
                zone: zone.clone(),
                ceiling_ns: u64::try_from(slot.ceiling.as_nanos()).unwrap_or(u64::MAX),
                violations: slot.violations.load(Ordering::Relaxed),
            })
            .collect();
        ZoneReport {
            utilization: self.utilization(),
            zones,
        }
    }

    /// 管理操作：清零全部违规计数与利用率。
    pub fn reset(&self) {
        for slot in self.zones.values() {
            slot.violations.store(0, Ordering::Relaxed);
        }
        self.publish_utilization(0.0);
    }
}
