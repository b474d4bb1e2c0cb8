//! # RoutingLayer：确定性路由层门面
//!
//! ## 核心意图（Why）
//! - 把解析器、哈希环、复制存储、端口分配器与延迟分类器组装为单一入口，外部服务只面对一个对象；
//! - 每次操作的墙钟耗时都按其所属分区交给分类器，违规只计数、不报错。
//!
//! ## 行为契约（What）
//! - 单组件操作（`resolve`、`place`、`store`、`retrieve`、`allocate`、`release`、`reserve`）返回组件自身的错误类型；
//! - 组合操作（`dispatch`、`open_endpoint`）返回 [`DispatchError`]，变体标明失败阶段；
//! - 利用率以分配器为准：`utilization()` 与 `telemetry()` 每次读取都按当前时钟重新计算（TTL 到期的分配
//!   即使尚未清理也不计入），并把结果发布到分类器；分配器变更之后同样立即发布。
//!
//! ## 实现策略（How）
//! - 组件全部由门面独占持有，共享部分（分类器、哈希环）以 `Arc` 注入，不存在进程级单例；
//! - 存取路径只在 `ReplicatedStore` 内部 `.await`，门面只在发布利用率时持有一把短锁，
//!   保证“计算 + 发布”整体串行，较旧的读数不会覆盖较新的读数。

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_dispatch_core::{
    AllocError, DispatchConfig, HashRing, HealthStatus, Node, OwnerId, Port, PortAllocation,
    PortAllocator, ResolveError, Resolution, RouteEntry, RouteKey, RouteResolver, ZoneClassifier,
    ZoneName, ZoneReport, ZoneVerdict,
};
use spark_dispatch_store::{
    NodeTransport, ObjectKey, ReplicatedStore, RetrieveError, StoreError, StoreReceipt,
};
use tracing::{debug, info};

use crate::error::{DispatchError, SnapshotError};
use crate::snapshot::{AllocationRecord, RouteRecord, Snapshot};
use crate::telemetry::TelemetryReport;

/// 门面为各类操作计时所归属的分区。
#[derive(Clone, Debug)]
struct OperationZones {
    resolve: ZoneName,
    update: ZoneName,
    place: ZoneName,
    allocate: ZoneName,
    release: ZoneName,
    reserve: ZoneName,
    store: ZoneName,
    retrieve: ZoneName,
}

impl OperationZones {
    fn from_config(operations: &spark_dispatch_core::config::OperationZones) -> Self {
        let zone = |name: &str| ZoneName::from(name);
        Self {
            resolve: zone(&operations.resolve),
            update: zone(&operations.update),
            place: zone(&operations.place),
            allocate: zone(&operations.allocate),
            release: zone(&operations.release),
            reserve: zone(&operations.reserve),
            store: zone(&operations.store),
            retrieve: zone(&operations.retrieve),
        }
    }
}

/// `dispatch` 的结果。
#[derive(Clone, Debug)]
pub struct Dispatched {
    pub resolution: Resolution,
    /// 仅在携带负载时存在。
    pub receipt: Option<StoreReceipt>,
}

/// `open_endpoint` 的结果：解析得到的目标与为其分配的本地端口。
#[derive(Clone, Debug)]
pub struct OpenedEndpoint {
    pub resolution: Resolution,
    pub port: Port,
}

/// 路由层门面。
///
/// # 教案式注释
/// - **意图 (Why)**：外部服务只需持有一个 `Arc<RoutingLayer>`；
/// - **契约 (What)**：`Send + Sync`，所有方法接收 `&self`；
/// - **风险 (Trade-offs)**：门面计时包含组件内部的日志开销，纳秒级分区在开启 `trace` 日志时更容易违规。
pub struct RoutingLayer {
    classifier: Arc<ZoneClassifier>,
    resolver: RouteResolver,
    ring: Arc<HashRing>,
    store: ReplicatedStore,
    allocator: PortAllocator,
    zones: OperationZones,
    retrieve_timeout: Duration,
    gauge: Mutex<()>,
}

impl std::fmt::Debug for RoutingLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingLayer")
            .field("resolver", &self.resolver.stats())
            .field("allocator", &self.allocator)
            .field("zones", &self.zones)
            .finish_non_exhaustive()
    }
}

impl RoutingLayer {
    /// 依据配置组装各组件。配置在此再次校验。
    pub fn new(
        config: &DispatchConfig,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, spark_dispatch_core::ConfigError> {
        config.validate()?;
        let classifier = Arc::new(config.classifier());
        let mut resolver = RouteResolver::new(config.domain_slice()?, Arc::clone(&classifier));
        if let Some(zone) = &config.resolver.default_zone {
            resolver = resolver.with_default_zone(zone.as_str());
        }
        let ring = Arc::new(config.hash_ring()?);
        let store = ReplicatedStore::new(Arc::clone(&ring), transport);
        let allocator = PortAllocator::new(config.port_range()?);

        Ok(Self {
            classifier,
            resolver,
            ring,
            store,
            allocator,
            zones: OperationZones::from_config(&config.zones.operations),
            retrieve_timeout: config.retrieve_timeout(),
            gauge: Mutex::new(()),
        })
    }

    /// 以替换过的分配器构造门面，主要用于注入 [`spark_dispatch_core::ManualClock`]。
    #[must_use]
    pub fn with_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = allocator;
        self.publish_utilization();
        self
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn classifier(&self) -> &Arc<ZoneClassifier> {
        &self.classifier
    }

    pub fn content_store(&self) -> &ReplicatedStore {
        &self.store
    }

    // ---------------------------------------------------------------------
    // 路由解析
    // ---------------------------------------------------------------------

    pub fn resolve(&self, key: RouteKey) -> Result<Resolution, ResolveError> {
        let started = Instant::now();
        let outcome = self.resolver.resolve(key);
        self.observe(&self.zones.resolve, started);
        outcome
    }

    pub fn update_route(&self, key: RouteKey, entry: RouteEntry) -> Option<Arc<RouteEntry>> {
        let started = Instant::now();
        let previous = self.resolver.update_route(key, entry);
        self.observe(&self.zones.update, started);
        previous
    }

    pub fn remove_route(&self, key: RouteKey) -> Option<Arc<RouteEntry>> {
        let started = Instant::now();
        let removed = self.resolver.remove_route(key);
        self.observe(&self.zones.update, started);
        removed
    }

    pub fn set_health(&self, key: RouteKey, health: HealthStatus) -> bool {
        self.resolver.set_health(key, health)
    }

    pub fn observe_latency(&self, key: RouteKey, latency: Duration) -> Option<ZoneVerdict> {
        self.resolver.observe_latency(key, latency)
    }

    // ---------------------------------------------------------------------
    // 放置与存取
    // ---------------------------------------------------------------------

    /// 键的落点节点，主节点在前。
    pub fn place(&self, key: &ObjectKey) -> Vec<Node> {
        let started = Instant::now();
        let placement = self.store.placement(key);
        self.observe(&self.zones.place, started);
        placement
    }

    pub async fn store(&self, key: &ObjectKey, payload: Bytes) -> Result<StoreReceipt, StoreError> {
        let started = Instant::now();
        let outcome = self.store.store(key, payload).await;
        self.observe(&self.zones.store, started);
        outcome
    }

    pub async fn retrieve(
        &self,
        key: &ObjectKey,
        deadline: tokio::time::Instant,
    ) -> Result<Bytes, RetrieveError> {
        let started = Instant::now();
        let outcome = self.store.retrieve(key, deadline).await;
        self.observe(&self.zones.retrieve, started);
        outcome
    }

    /// 使用配置中的 `retrieve_timeout_ms` 作为截止时间。
    pub async fn retrieve_default(&self, key: &ObjectKey) -> Result<Bytes, RetrieveError> {
        self.retrieve(key, tokio::time::Instant::now() + self.retrieve_timeout)
            .await
    }

    // ---------------------------------------------------------------------
    // 端口分配
    // ---------------------------------------------------------------------

    pub fn allocate(&self, owner: &OwnerId, zone: &ZoneName) -> Result<Port, AllocError> {
        let started = Instant::now();
        let outcome = self.allocator.allocate(owner, zone);
        self.observe(&self.zones.allocate, started);
        self.publish_utilization();
        outcome
    }

    pub fn allocate_with_ttl(
        &self,
        owner: &OwnerId,
        zone: &ZoneName,
        ttl: Duration,
    ) -> Result<Port, AllocError> {
        let started = Instant::now();
        let outcome = self.allocator.allocate_with_ttl(owner, zone, ttl);
        self.observe(&self.zones.allocate, started);
        self.publish_utilization();
        outcome
    }

    pub fn release(&self, port: Port) -> Option<PortAllocation> {
        let started = Instant::now();
        let released = self.allocator.release(port);
        self.observe(&self.zones.release, started);
        self.publish_utilization();
        released
    }

    pub fn release_owner(&self, owner: &OwnerId) -> Vec<Port> {
        let started = Instant::now();
        let released = self.allocator.release_owner(owner);
        self.observe(&self.zones.release, started);
        self.publish_utilization();
        released
    }

    pub fn reserve(&self, owner: &OwnerId, port: Port) -> Result<(), AllocError> {
        let started = Instant::now();
        let outcome = self.allocator.reserve(owner, port);
        self.observe(&self.zones.reserve, started);
        self.publish_utilization();
        outcome
    }

    /// 清理过期分配并刷新利用率，计入 `release` 分区。
    pub fn sweep_expired(&self) -> Vec<PortAllocation> {
        let started = Instant::now();
        let swept = self.allocator.sweep_expired();
        self.observe(&self.zones.release, started);
        self.publish_utilization();
        swept
    }

    // ---------------------------------------------------------------------
    // 遥测
    // ---------------------------------------------------------------------

    /// 当前分配器利用率。TTL 已到期但尚未清理的分配不计入；读数同时发布到分类器。
    pub fn utilization(&self) -> f64 {
        self.publish_utilization()
    }

    pub fn violations(&self, zone: &str) -> u64 {
        self.classifier.violations(zone)
    }

    pub fn zone_report(&self) -> ZoneReport {
        self.publish_utilization();
        self.classifier.report()
    }

    pub fn telemetry(&self) -> TelemetryReport {
        let utilization = self.publish_utilization();
        let report = self.classifier.report();
        TelemetryReport {
            utilization,
            exhaustions: self.allocator.exhaustions(),
            zones: report.zones,
            resolver: self.resolver.stats(),
            ring_nodes: self.ring.nodes().len(),
        }
    }

    // ---------------------------------------------------------------------
    // 组合操作
    // ---------------------------------------------------------------------

    /// 解析路由键；携带负载时以路由键为对象键写入复制存储。
    pub async fn dispatch(
        &self,
        key: RouteKey,
        payload: Option<Bytes>,
    ) -> Result<Dispatched, DispatchError> {
        let resolution = self.resolve(key)?;
        let receipt = match payload {
            Some(payload) => Some(self.store(&ObjectKey::from(key), payload).await?),
            None => None,
        };
        debug!(%key, endpoint = %resolution.entry().endpoint(), stored = receipt.is_some(), "dispatched");
        Ok(Dispatched {
            resolution,
            receipt,
        })
    }

    /// 读取 `dispatch` 以路由键写入的内容。
    pub async fn fetch(&self, key: RouteKey) -> Result<Bytes, DispatchError> {
        Ok(self.retrieve_default(&ObjectKey::from(key)).await?)
    }

    /// 解析目标后为所有者分配本地端口，供建立到该目标的连接使用。
    pub fn open_endpoint(
        &self,
        key: RouteKey,
        owner: &OwnerId,
        zone: &ZoneName,
    ) -> Result<OpenedEndpoint, DispatchError> {
        let resolution = self.resolve(key)?;
        let port = self.allocate(owner, zone)?;
        debug!(%key, %owner, port, endpoint = %resolution.entry().endpoint(), "endpoint opened");
        Ok(OpenedEndpoint { resolution, port })
    }

    // ---------------------------------------------------------------------
    // 快照
    // ---------------------------------------------------------------------

    /// 当前精确路由表与活跃分配的快照。
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            routes: self
                .resolver
                .routes()
                .iter()
                .map(|(key, entry)| RouteRecord::from_entry(*key, entry))
                .collect(),
            allocations: self
                .allocator
                .allocations()
                .iter()
                .map(AllocationRecord::from)
                .collect(),
        }
    }

    /// 原子写入快照文件。
    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        snapshot.write(path)?;
        info!(
            path = %path.display(),
            routes = snapshot.routes.len(),
            allocations = snapshot.allocations.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// 依据配置组装门面，并从快照文件恢复路由与分配。
    pub fn restore(
        config: &DispatchConfig,
        path: impl AsRef<Path>,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let snapshot = Snapshot::read(path)?;
        let layer = Self::new(config, transport)?;
        layer.apply(snapshot)?;
        info!(path = %path.display(), "state restored from checkpoint");
        Ok(layer)
    }

    /// 把快照内容装入当前实例，要么全部生效，要么不做任何改动。
    ///
    /// - 分配记录越界或与已有分配冲突时返回错误，此时路由表与分配表都保持调用前的状态；
    /// - 分配器整批校验后才写入，路由写入不会失败，因此先恢复分配、再写路由即可保证整体原子。
    pub fn apply(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let allocations = self
            .allocator
            .restore(snapshot.allocations.into_iter().map(PortAllocation::from))?;
        self.publish_utilization();
        let routes = snapshot.routes.len();
        for record in &snapshot.routes {
            self.resolver.update_route(record.prefix, record.to_entry());
        }
        debug!(routes, allocations, "snapshot applied");
        Ok(())
    }

    fn observe(&self, zone: &ZoneName, started: Instant) {
        self.classifier.classify(zone.as_str(), started.elapsed());
    }

    /// 在短锁内重新计算并发布利用率，返回发布的值。
    fn publish_utilization(&self) -> f64 {
        let _gauge = self.gauge.lock();
        let utilization = self.allocator.utilization();
        self.classifier.publish_utilization(utilization);
        utilization
    }
}
