//! # spark-dispatch-core
//!
//! ## 定位（Why）
//! - 确定性路由层的同步核心：把定宽路由键解析为端点、把对象键放置到哈希环上的节点、
//!   在有界区间内分配端口，并按延迟预算分区统计违规；
//! - 所有操作在同一拓扑与同一调用序列下结果可重复，不依赖随机数。
//!
//! ## 模块地图（What）
//! - [`resolver`]：精确表 → 域回退 → 区间回退 → 默认链的四级解析；
//! - [`ring`]：带虚拟节点的一致性哈希环，拓扑以快照形式热替换；
//! - [`allocator`]：环形游标端口分配器，支持预留与 TTL；
//! - [`zone`]：延迟分区分类器与利用率读数；
//! - [`config`]：TOML 配置及其校验；
//! - [`error`]：带稳定错误码的错误类型。
//!
//! ## 并发模型（How）
//! - 读多写少的表（域/区间/默认链、环拓扑）由 `ArcSwap` 发布不可变快照；
//! - 精确路由表使用 `DashMap`，条目以 `Arc<RouteEntry>` 整体替换；
//! - 分配器的“认领 + 游标推进”位于同一把互斥锁内；
//! - 计数器使用原子变量，违规不是错误，只体现为读数。

pub mod allocator;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod resolver;
pub mod ring;
pub mod zone;

pub use allocator::{Port, PortAllocation, PortAllocator, PortRange, UNZONED};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DispatchConfig;
pub use error::{AllocError, ConfigError, ResolveError, TopologyError};
pub use ids::{Endpoint, NodeId, OwnerId, ZoneName};
pub use resolver::{
    DomainId, DomainSlice, HealthStatus, RangeRule, Resolution, ResolutionTier, ResolverStats,
    RouteEntry, RouteKey, RouteResolver, RouteType,
};
pub use ring::{HashRing, MAX_VNODES_PER_NODE, Node, NodeIndex, RingSnapshot, ring_position};
pub use zone::{ZoneClassifier, ZoneReport, ZoneTally, ZoneVerdict};
