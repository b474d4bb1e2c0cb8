//! # PortAllocator：确定性环形端口分配器
//!
//! ## 核心意图（Why）
//! - 在有界区间 `[min, max]` 上以游标顺序分配端口，同一拓扑与调用序列总是得到相同结果；
//! - “同一端口不会同时被两个活跃所有者持有”是核心不变量，而非性能目标。
//!
//! ## 行为契约（What）
//! 1. `allocate`：所有者若持有预留，直接返回预留端口（幂等）；
//! 2. 否则从游标开始向前扫描（到 `max` 后回绕至 `min`），第一个空闲端口被占用，游标越过它；
//! 3. 完整绕回一圈仍无空闲端口时返回 [`AllocError::Exhausted`]，并累加耗尽计数供编排器读取；
//! - `release`：无条件移除分配（连同指向该端口的预留），端口可被立即复用；
//! - `reserve`：预留即占用，扫描永远不会把预留端口交给其他所有者。
//!
//! ## 实现策略（How）
//! - 游标、分配表与预留表放在同一把 `parking_lot::Mutex` 中，“认领 + 游标推进”构成单一临界区，
//!   所有成功认领因此线性一致；
//! - TTL 到期的分配在扫描中被视为空闲并就地回收，也可通过 `sweep_expired` 主动清理。
//!
//! ## 风险提示（Trade-offs）
//! - 临界区内最坏需要扫描整个区间（最多 65536 次哈希查找），对大区间高占用场景应缩小区间；
//! - 分配器本身不执行扩容，耗尽只体现为计数与利用率读数。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::AllocError;
use crate::ids::{OwnerId, ZoneName};

/// 端口号。
pub type Port = u16;

/// 仅预留、尚未经 `allocate` 打标签的端口所使用的分区名。
pub const UNZONED: &str = "unzoned";

/// 闭区间 `[min, max]`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    min: Port,
    max: Port,
}

impl PortRange {
    /// 构造端口区间；`min > max` 时返回 `None`。
    pub fn new(min: Port, max: Port) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn min(&self) -> Port {
        self.min
    }

    pub fn max(&self) -> Port {
        self.max
    }

    /// 区间内端口个数（闭区间，至少为 1）。
    pub fn len(&self) -> u32 {
        u32::from(self.max) - u32::from(self.min) + 1
    }

    /// 闭区间永不为空，保留该方法以满足集合类 API 的惯例。
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, port: Port) -> bool {
        (self.min..=self.max).contains(&port)
    }

    /// 从 `start` 出发向前第 `step` 个端口（环形）。
    fn nth_from(&self, start: Port, step: u32) -> Port {
        let offset = (u32::from(start - self.min) + step) % self.len();
        // offset < len，因此 min + offset <= max，转换不会截断。
        #[allow(clippy::cast_possible_truncation)]
        let port = (u32::from(self.min) + offset) as Port;
        port
    }
}

/// 一条活跃的端口分配记录。
///
/// - **契约 (What)**：`allocated_at_ms` 为 Unix 毫秒时间戳；`ttl` 为 `None` 表示永不过期；
/// - **生命周期**：由 `allocate`/`reserve` 创建，由 `release`、`release_owner` 或 TTL 到期销毁。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub port: Port,
    pub owner: OwnerId,
    pub zone: ZoneName,
    pub allocated_at_ms: u64,
    pub ttl: Option<Duration>,
}

impl PortAllocation {
    /// 到期时间点（Unix 毫秒）。
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.ttl.map(|ttl| {
            let ttl = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            self.allocated_at_ms.saturating_add(ttl)
        })
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms().is_some_and(|deadline| now_ms >= deadline)
    }
}

#[derive(Debug)]
struct AllocatorState {
    cursor: Port,
    allocations: HashMap<Port, PortAllocation>,
    reservations: HashMap<OwnerId, Port>,
}

impl AllocatorState {
    /// 移除端口分配，并顺带清理指向它的预留。
    fn evict(&mut self, port: Port) -> Option<PortAllocation> {
        let removed = self.allocations.remove(&port)?;
        if self.reservations.get(&removed.owner) == Some(&port) {
            self.reservations.remove(&removed.owner);
        }
        Some(removed)
    }

    fn is_free(&self, port: Port, now_ms: u64) -> bool {
        self.allocations
            .get(&port)
            .is_none_or(|existing| existing.is_expired(now_ms))
    }
}

/// 确定性端口分配器。
///
/// # 教案式注释
/// - **意图 (Why)**：以显式对象持有“已分配集合”，替代进程级全局表，测试可以独立实例化；
/// - **契约 (What)**：`Send + Sync`，所有方法接收 `&self`，可在多线程中共享；
/// - **风险 (Trade-offs)**：互斥锁序列化所有认领操作，换取不可双重认领的强保证。
pub struct PortAllocator {
    range: PortRange,
    state: Mutex<AllocatorState>,
    exhaustions: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .field("exhaustions", &self.exhaustions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    /// 使用系统时钟构造分配器，游标从 `min` 开始。
    pub fn new(range: PortRange) -> Self {
        Self::with_clock(range, Arc::new(SystemClock))
    }

    /// 注入自定义时钟，主要用于 TTL 测试。
    pub fn with_clock(range: PortRange, clock: Arc<dyn Clock>) -> Self {
        Self {
            range,
            state: Mutex::new(AllocatorState {
                cursor: range.min(),
                allocations: HashMap::new(),
                reservations: HashMap::new(),
            }),
            exhaustions: AtomicU64::new(0),
            clock,
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// 为所有者分配一个端口，不设置 TTL。
    pub fn allocate(&self, owner: &OwnerId, zone: &ZoneName) -> Result<Port, AllocError> {
        self.claim(owner, zone, None)
    }

    /// 分配一个在 `ttl` 后自动失效的端口。
    pub fn allocate_with_ttl(
        &self,
        owner: &OwnerId,
        zone: &ZoneName,
        ttl: Duration,
    ) -> Result<Port, AllocError> {
        self.claim(owner, zone, Some(ttl))
    }

    fn claim(
        &self,
        owner: &OwnerId,
        zone: &ZoneName,
        ttl: Option<Duration>,
    ) -> Result<Port, AllocError> {
        let now_ms = self.clock.now_millis();
        let mut state = self.state.lock();

        if let Some(&port) = state.reservations.get(owner) {
            state.allocations.insert(
                port,
                PortAllocation {
                    port,
                    owner: owner.clone(),
                    zone: zone.clone(),
                    allocated_at_ms: now_ms,
                    ttl,
                },
            );
            debug!(%owner, port, "allocation served from reservation");
            return Ok(port);
        }

        let start = state.cursor;
        for step in 0..self.range.len() {
            let candidate = self.range.nth_from(start, step);
            if !state.is_free(candidate, now_ms) {
                continue;
            }
            if let Some(expired) = state.evict(candidate) {
                debug!(port = candidate, owner = %expired.owner, "reclaimed expired allocation");
            }
            state.allocations.insert(
                candidate,
                PortAllocation {
                    port: candidate,
                    owner: owner.clone(),
                    zone: zone.clone(),
                    allocated_at_ms: now_ms,
                    ttl,
                },
            );
            state.cursor = self.range.nth_from(candidate, 1);
            debug!(%owner, %zone, port = candidate, "port allocated");
            return Ok(candidate);
        }
        drop(state);

        let total = self.exhaustions.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            %owner,
            min = self.range.min(),
            max = self.range.max(),
            total,
            "port range exhausted"
        );
        Err(AllocError::Exhausted {
            min: self.range.min(),
            max: self.range.max(),
        })
    }

    /// 无条件释放端口，返回被移除的分配记录（未分配时为 `None`）。
    pub fn release(&self, port: Port) -> Option<PortAllocation> {
        let removed = self.state.lock().evict(port);
        if let Some(allocation) = &removed {
            debug!(port, owner = %allocation.owner, "port released");
        }
        removed
    }

    /// 释放某个所有者持有的全部端口与预留。
    pub fn release_owner(&self, owner: &OwnerId) -> Vec<Port> {
        let mut state = self.state.lock();
        let mut ports: Vec<Port> = state
            .allocations
            .values()
            .filter(|allocation| &allocation.owner == owner)
            .map(|allocation| allocation.port)
            .collect();
        ports.sort_unstable();
        for port in &ports {
            state.evict(*port);
        }
        state.reservations.remove(owner);
        ports
    }

    /// 为所有者预留指定端口。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：部分端点需要固定端口，预留在环形扫描之前被查询，且立即占用端口；
    /// - **契约 (What)**：
    ///   - 同一所有者重复预留同一端口返回 `Ok(())`；
    ///   - 端口被其他所有者占用（未过期）时返回 [`AllocError::Conflict`]；
    ///   - 所有者已预留其他端口时返回 [`AllocError::AlreadyReserved`]；
    ///   - 所有者已通过扫描持有该端口时，原分配转为预留，保留原分区标签。
    pub fn reserve(&self, owner: &OwnerId, port: Port) -> Result<(), AllocError> {
        if !self.range.contains(port) {
            return Err(AllocError::OutOfRange {
                port,
                min: self.range.min(),
                max: self.range.max(),
            });
        }

        let now_ms = self.clock.now_millis();
        let mut state = self.state.lock();

        if let Some(&existing) = state.reservations.get(owner) {
            if existing == port {
                return Ok(());
            }
            return Err(AllocError::AlreadyReserved {
                owner: owner.clone(),
                port: existing,
            });
        }

        let current = state
            .allocations
            .get(&port)
            .map(|current| (current.owner.clone(), current.is_expired(now_ms)));
        match current {
            Some((_, true)) => {
                state.evict(port);
            }
            Some((holder, false)) if &holder != owner => {
                return Err(AllocError::Conflict { port, holder });
            }
            _ => {}
        }

        state
            .allocations
            .entry(port)
            .or_insert_with(|| PortAllocation {
                port,
                owner: owner.clone(),
                zone: ZoneName::from(UNZONED),
                allocated_at_ms: now_ms,
                ttl: None,
            });
        state.reservations.insert(owner.clone(), port);
        debug!(%owner, port, "port reserved");
        Ok(())
    }

    /// 撤销预留；端口本身保持分配状态，只是不再被 `allocate` 幂等返回。
    pub fn unreserve(&self, owner: &OwnerId) -> Option<Port> {
        self.state.lock().reservations.remove(owner)
    }

    /// 查询所有者当前的预留。
    pub fn reservation(&self, owner: &OwnerId) -> Option<Port> {
        self.state.lock().reservations.get(owner).copied()
    }

    /// 当前持有端口的所有者（已过期的分配视为不存在）。
    pub fn holder(&self, port: Port) -> Option<OwnerId> {
        let now_ms = self.clock.now_millis();
        self.state
            .lock()
            .allocations
            .get(&port)
            .filter(|allocation| !allocation.is_expired(now_ms))
            .map(|allocation| allocation.owner.clone())
    }

    /// 主动清理全部已过期分配，返回被清理的记录（按端口排序）。
    pub fn sweep_expired(&self) -> Vec<PortAllocation> {
        let now_ms = self.clock.now_millis();
        let mut state = self.state.lock();
        let mut expired: Vec<Port> = state
            .allocations
            .values()
            .filter(|allocation| allocation.is_expired(now_ms))
            .map(|allocation| allocation.port)
            .collect();
        expired.sort_unstable();
        expired
            .into_iter()
            .filter_map(|port| state.evict(port))
            .collect()
    }

    /// 全部活跃分配（按端口排序），用于快照落盘。
    pub fn allocations(&self) -> Vec<PortAllocation> {
        let now_ms = self.clock.now_millis();
        let state = self.state.lock();
        let mut active: Vec<PortAllocation> = state
            .allocations
            .values()
            .filter(|allocation| !allocation.is_expired(now_ms))
            .cloned()
            .collect();
        active.sort_unstable_by_key(|allocation| allocation.port);
        active
    }

    /// 以快照恢复分配记录，返回恢复的条数。
    ///
    /// - **契约 (What)**：越界端口返回 [`AllocError::OutOfRange`]，与已有分配或批内前序记录
    ///   冲突返回 [`AllocError::Conflict`]；
    /// - **原子性**：整批校验通过后才写入，出错时分配表保持调用前的状态。
    pub fn restore<I>(&self, allocations: I) -> Result<usize, AllocError>
    where
        I: IntoIterator<Item = PortAllocation>,
    {
        let batch: Vec<PortAllocation> = allocations.into_iter().collect();
        let mut state = self.state.lock();

        let mut staged: HashMap<Port, &OwnerId> = HashMap::with_capacity(batch.len());
        for allocation in &batch {
            if !self.range.contains(allocation.port) {
                return Err(AllocError::OutOfRange {
                    port: allocation.port,
                    min: self.range.min(),
                    max: self.range.max(),
                });
            }
            let holder = state
                .allocations
                .get(&allocation.port)
                .map(|current| &current.owner)
                .or_else(|| staged.get(&allocation.port).copied());
            if let Some(holder) = holder {
                return Err(AllocError::Conflict {
                    port: allocation.port,
                    holder: holder.clone(),
                });
            }
            staged.insert(allocation.port, &allocation.owner);
        }
        drop(staged);

        let restored = batch.len();
        for allocation in batch {
            state.allocations.insert(allocation.port, allocation);
        }
        Ok(restored)
    }

    /// 活跃分配数量 / 区间容量。
    pub fn utilization(&self) -> f64 {
        let now_ms = self.clock.now_millis();
        let active = self
            .state
            .lock()
            .allocations
            .values()
            .filter(|allocation| !allocation.is_expired(now_ms))
            .count();
        // 端口数量上限 65536，f64 可以精确表示。
        #[allow(clippy::cast_precision_loss)]
        let ratio = active as f64 / f64::from(self.range.len());
        ratio
    }

    /// 自构造以来的耗尽次数。
    pub fn exhaustions(&self) -> u64 {
        self.exhaustions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;
    use std::thread;
    use tracing_test::traced_test;

    fn owner(name: &str) -> OwnerId {
        OwnerId::from(name)
    }

    fn zone() -> ZoneName {
        ZoneName::from("tactical")
    }

    fn eleven_ports() -> PortAllocator {
        PortAllocator::new(PortRange::new(2000, 2010).expect("合法区间"))
    }

    #[traced_test]
    #[test]
    fn eleven_ports_then_exhaustion() {
        let allocator = eleven_ports();
        let mut seen = HashSet::new();
        for i in 0..11 {
            let port = allocator
                .allocate(&owner(&format!("svc-{i}")), &zone())
                .expect("区间内应有空闲端口");
            assert!(seen.insert(port), "端口 {port} 被重复分配");
        }
        assert_eq!(seen.len(), 11);

        let err = allocator
            .allocate(&owner("svc-11"), &zone())
            .expect_err("第 12 次分配必须耗尽");
        assert_eq!(err, AllocError::Exhausted { min: 2000, max: 2010 });
        assert_eq!(allocator.exhaustions(), 1);
        assert_eq!(allocator.utilization(), 1.0);
        assert!(logs_contain("port range exhausted"));
    }

    #[test]
    fn scan_is_deterministic_and_cursor_advances() {
        let allocator = eleven_ports();
        assert_eq!(allocator.allocate(&owner("a"), &zone()), Ok(2000));
        assert_eq!(allocator.allocate(&owner("b"), &zone()), Ok(2001));
        allocator.release(2000);
        // 游标已越过 2000，下一次扫描从 2002 开始。
        assert_eq!(allocator.allocate(&owner("c"), &zone()), Ok(2002));
    }

    #[test]
    fn released_port_is_reusable_without_quarantine() {
        let allocator = PortAllocator::new(PortRange::new(3000, 3000).expect("单端口区间"));
        let port = allocator.allocate(&owner("a"), &zone()).expect("首次分配");
        assert!(allocator.release(port).is_some());
        assert_eq!(allocator.allocate(&owner("b"), &zone()), Ok(port));
    }

    #[test]
    fn release_of_unknown_port_is_a_no_op() {
        let allocator = eleven_ports();
        assert!(allocator.release(2005).is_none());
    }

    #[test]
    fn reservation_is_idempotent_and_precedes_scan() {
        let allocator = eleven_ports();
        allocator.reserve(&owner("db"), 2000).expect("预留空闲端口");
        allocator.reserve(&owner("db"), 2000).expect("重复预留应幂等");

        // 扫描跳过已预留端口。
        assert_eq!(allocator.allocate(&owner("web"), &zone()), Ok(2001));
        assert_eq!(allocator.allocate(&owner("db"), &zone()), Ok(2000));
        assert_eq!(allocator.allocate(&owner("db"), &zone()), Ok(2000));
        let record = allocator
            .allocations()
            .into_iter()
            .find(|allocation| allocation.port == 2000)
            .expect("预留端口应有分配记录");
        assert_eq!(record.zone, zone());
    }

    #[test]
    fn reservation_conflicts() {
        let allocator = eleven_ports();
        let port = allocator.allocate(&owner("web"), &zone()).expect("分配");
        assert_eq!(
            allocator.reserve(&owner("db"), port),
            Err(AllocError::Conflict {
                port,
                holder: owner("web"),
            })
        );
        allocator.reserve(&owner("db"), 2005).expect("预留");
        assert_eq!(
            allocator.reserve(&owner("db"), 2006),
            Err(AllocError::AlreadyReserved {
                owner: owner("db"),
                port: 2005,
            })
        );
        assert!(matches!(
            allocator.reserve(&owner("db"), 9000),
            Err(AllocError::OutOfRange { .. })
        ));
    }

    #[test]
    fn release_drops_reservation() {
        let allocator = eleven_ports();
        allocator.reserve(&owner("db"), 2003).expect("预留");
        allocator.release(2003);
        assert_eq!(allocator.reservation(&owner("db")), None);
        assert_eq!(allocator.holder(2003), None);
    }

    #[test]
    fn expired_allocations_are_reclaimed() {
        let clock = ManualClock::new(10_000);
        let allocator = PortAllocator::with_clock(
            PortRange::new(4000, 4001).expect("区间"),
            Arc::new(clock.clone()),
        );
        allocator
            .allocate_with_ttl(&owner("a"), &zone(), Duration::from_secs(1))
            .expect("分配");
        allocator.allocate(&owner("b"), &zone()).expect("分配");
        assert!(allocator.allocate(&owner("c"), &zone()).is_err());

        clock.advance(Duration::from_secs(1));
        assert_eq!(allocator.holder(4000), None, "到期分配不再有持有者");
        assert_eq!(allocator.allocate(&owner("c"), &zone()), Ok(4000));
        assert_eq!(allocator.holder(4000), Some(owner("c")));
    }

    #[test]
    fn sweep_removes_only_expired_records() {
        let clock = ManualClock::new(0);
        let allocator = PortAllocator::with_clock(
            PortRange::new(5000, 5009).expect("区间"),
            Arc::new(clock.clone()),
        );
        allocator
            .allocate_with_ttl(&owner("short"), &zone(), Duration::from_millis(10))
            .expect("分配");
        allocator.allocate(&owner("long"), &zone()).expect("分配");
        clock.advance(Duration::from_millis(10));

        let swept = allocator.sweep_expired();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].owner, owner("short"));
        assert_eq!(allocator.allocations().len(), 1);
    }

    #[test]
    fn release_owner_frees_everything_it_holds() {
        let allocator = eleven_ports();
        allocator.allocate(&owner("a"), &zone()).expect("分配");
        allocator.allocate(&owner("b"), &zone()).expect("分配");
        allocator.allocate(&owner("a"), &zone()).expect("分配");
        allocator.reserve(&owner("a"), 2009).expect("预留");
        assert_eq!(allocator.release_owner(&owner("a")), vec![2000, 2002, 2009]);
        assert_eq!(allocator.reservation(&owner("a")), None);
        assert_eq!(allocator.allocations().len(), 1);
    }

    #[test]
    fn restore_rejects_conflicting_records() {
        let allocator = eleven_ports();
        let record = PortAllocation {
            port: 2004,
            owner: owner("restored"),
            zone: zone(),
            allocated_at_ms: 42,
            ttl: None,
        };
        assert_eq!(allocator.restore([record.clone()]), Ok(1));
        assert!(matches!(
            allocator.restore([record]),
            Err(AllocError::Conflict { port: 2004, .. })
        ));
        assert_eq!(allocator.holder(2004), Some(owner("restored")));
    }

    #[test]
    fn failed_restore_leaves_state_untouched() {
        let allocator = eleven_ports();
        let record = |port, name: &str| PortAllocation {
            port,
            owner: owner(name),
            zone: zone(),
            allocated_at_ms: 42,
            ttl: None,
        };

        let out_of_range = [record(2001, "a"), record(2002, "b"), record(9000, "c")];
        assert!(matches!(
            allocator.restore(out_of_range),
            Err(AllocError::OutOfRange { port: 9000, .. })
        ));
        let duplicated = [record(2003, "a"), record(2003, "b")];
        assert_eq!(
            allocator.restore(duplicated),
            Err(AllocError::Conflict {
                port: 2003,
                holder: owner("a"),
            })
        );
        assert!(allocator.allocations().is_empty(), "失败的批次不应留下任何记录");
        assert_eq!(allocator.utilization(), 0.0);
    }

    #[test]
    fn concurrent_claims_never_collide() {
        let allocator = Arc::new(PortAllocator::new(
            PortRange::new(6000, 6063).expect("区间"),
        ));
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    allocator
                        .allocate(&OwnerId::from(format!("worker-{i}")), &ZoneName::from("z"))
                        .expect("容量充足时分配必须成功")
                })
            })
            .collect();
        let ports: HashSet<Port> = handles
            .into_iter()
            .map(|handle| handle.join().expect("分配线程不应 panic"))
            .collect();
        assert_eq!(ports.len(), 64, "并发认领出现重复端口");
    }
}
