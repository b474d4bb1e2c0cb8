use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{Endpoint, ZoneName};
use crate::zone::ZoneVerdict;

/// 路由键：由外部从内容地址派生的定宽前缀，本层只关心其位宽。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(u64);

impl RouteKey {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for RouteKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// 路由目标的健康状态。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

/// 解析结果：目标端点及其元数据。
///
/// # 教案式说明
/// - **意图 (Why)**：条目在表中以 `Arc<RouteEntry>` 存放，任何修改都构造新值后整体替换，
///   并发读者要么看到旧值、要么看到新值，绝不会读到字段混杂的半成品；
/// - **契约 (What)**：`priority` 越大越优先，仅用于域回退列表排序；
///   `zone` 指定该目标的延迟预算分区，`observe_latency` 据此分类；
/// - **构造 (How)**：`RouteEntry::new` + `with_*` 链式补充元数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    endpoint: Endpoint,
    priority: u32,
    health: HealthStatus,
    latency: Option<Duration>,
    zone: Option<ZoneName>,
    verdict: Option<ZoneVerdict>,
}

impl RouteEntry {
    pub fn new(endpoint: impl Into<Endpoint>, priority: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            priority,
            health: HealthStatus::Healthy,
            latency: None,
            zone: None,
            verdict: None,
        }
    }

    #[must_use]
    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<ZoneName>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// 记录一次测量结果及其分类结论。
    #[must_use]
    pub fn with_measurement(mut self, latency: Duration, verdict: ZoneVerdict) -> Self {
        self.latency = Some(latency);
        self.verdict = Some(verdict);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    /// 最近一次测得的延迟。
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn zone(&self) -> Option<&ZoneName> {
        self.zone.as_ref()
    }

    /// 最近一次测量的分区结论。
    pub fn verdict(&self) -> Option<ZoneVerdict> {
        self.verdict
    }
}
