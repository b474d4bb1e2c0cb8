//! # RouteResolver：分层路由解析器
//!
//! ## 核心意图（Why）
//! - 将结构化路由键解析为目标端点，按“精确表 → 域回退 → 区间回退 → 默认链”严格顺序查找，
//!   第一个命中者胜出；
//! - 精确表承担热更新（`update_route`），其余三张表在稳态下只读、整表替换。
//!
//! ## 行为契约（What）
//! - `resolve` 返回 [`Resolution`]，携带命中条目与命中层级；全部未命中返回
//!   [`ResolveError::NotFound`]，解析器从不内部重试；
//! - 区间回退命中的规则若其路由类型未绑定目标，不再尝试后续规则，直接进入默认链；
//! - `update_route` 以 `Arc` 整体替换条目，并发读者看到的是完整旧值或完整新值。
//!
//! ## 实现策略（How）
//! - 精确表使用 `DashMap<RouteKey, Arc<RouteEntry>>`：分片锁只在单次查找内持有，
//!   读出的 `Arc` 克隆后立即释放分片；
//! - 域表、区间表与默认链各自由 `ArcSwap` 承载，读路径零锁，管理替换只是一次指针交换。

mod entry;
mod tables;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::ResolveError;
use crate::ids::ZoneName;
use crate::zone::{ZoneClassifier, ZoneVerdict};

pub use entry::{HealthStatus, RouteEntry, RouteKey};
pub use tables::{DomainId, DomainSlice, RangeRule, RouteType};

use tables::{DomainTable, FallbackChain, RangeHit, RangeTable};

/// 命中层级。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolutionTier {
    Exact,
    Domain(DomainId),
    Range(RouteType),
    Fallback,
}

/// 一次成功解析的结果。
#[derive(Clone, Debug)]
pub struct Resolution {
    entry: Arc<RouteEntry>,
    tier: ResolutionTier,
}

impl Resolution {
    pub fn entry(&self) -> &Arc<RouteEntry> {
        &self.entry
    }

    pub fn tier(&self) -> ResolutionTier {
        self.tier
    }

    /// 取出条目，丢弃层级信息。
    pub fn into_entry(self) -> Arc<RouteEntry> {
        self.entry
    }
}

/// 各张表的规模读数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub routes: usize,
    pub domains: usize,
    pub range_rules: usize,
    pub fallback_entries: usize,
    pub revision: u64,
}

/// 分层路由解析器。
///
/// # 教案式注释
/// - **意图 (Why)**：以显式对象持有路由表，由门面或测试按需实例化，避免进程级单例；
/// - **契约 (What)**：`Send + Sync`；所有方法接收 `&self`；`revision` 在每次整表替换后递增；
/// - **风险 (Trade-offs)**：域/区间/默认链只能整表替换，单条修改需要调用方重建整表。
#[derive(Debug)]
pub struct RouteResolver {
    table: DashMap<RouteKey, Arc<RouteEntry>>,
    domains: ArcSwap<DomainTable>,
    ranges: ArcSwap<RangeTable>,
    fallback: ArcSwap<FallbackChain>,
    slice: DomainSlice,
    classifier: Arc<ZoneClassifier>,
    default_zone: Option<ZoneName>,
    revision: AtomicU64,
}

impl RouteResolver {
    /// 构造空解析器。
    pub fn new(slice: DomainSlice, classifier: Arc<ZoneClassifier>) -> Self {
        Self {
            table: DashMap::new(),
            domains: ArcSwap::from_pointee(DomainTable::default()),
            ranges: ArcSwap::from_pointee(RangeTable::default()),
            fallback: ArcSwap::from_pointee(FallbackChain::default()),
            slice,
            classifier,
            default_zone: None,
            revision: AtomicU64::new(0),
        }
    }

    /// 条目未声明分区时，`observe_latency` 使用的默认分区。
    #[must_use]
    pub fn with_default_zone(mut self, zone: impl Into<ZoneName>) -> Self {
        self.default_zone = Some(zone.into());
        self
    }

    pub fn domain_slice(&self) -> DomainSlice {
        self.slice
    }

    /// 按严格顺序解析路由键。
    pub fn resolve(&self, key: RouteKey) -> Result<Resolution, ResolveError> {
        if let Some(entry) = self.table.get(&key).map(|slot| Arc::clone(slot.value())) {
            return Ok(Resolution {
                entry,
                tier: ResolutionTier::Exact,
            });
        }

        let domain = self.slice.domain_of(key);
        if let Some(entry) = self.domains.load().head(domain) {
            trace!(%key, domain = domain.get(), "resolved through domain fallback");
            return Ok(Resolution {
                entry: Arc::clone(entry),
                tier: ResolutionTier::Domain(domain),
            });
        }

        match self.ranges.load().lookup(key) {
            RangeHit::Bound(route_type, entry) => {
                trace!(%key, ?route_type, "resolved through range fallback");
                return Ok(Resolution {
                    entry: Arc::clone(entry),
                    tier: ResolutionTier::Range(route_type),
                });
            }
            RangeHit::Unbound(route_type) => {
                debug!(%key, ?route_type, "range rule matched an unbound route type");
            }
            RangeHit::Miss => {}
        }

        if let Some(entry) = self.fallback.load().head() {
            trace!(%key, "resolved through fallback chain");
            return Ok(Resolution {
                entry: Arc::clone(entry),
                tier: ResolutionTier::Fallback,
            });
        }

        Err(ResolveError::NotFound { key })
    }

    /// 原子替换精确表中的条目，返回旧值。
    pub fn update_route(&self, key: RouteKey, entry: RouteEntry) -> Option<Arc<RouteEntry>> {
        let previous = self.table.insert(key, Arc::new(entry));
        debug!(%key, replaced = previous.is_some(), "route updated");
        previous
    }

    /// 从精确表移除条目。
    pub fn remove_route(&self, key: RouteKey) -> Option<Arc<RouteEntry>> {
        let removed = self.table.remove(&key).map(|(_, entry)| entry);
        if removed.is_some() {
            debug!(%key, "route removed");
        }
        removed
    }

    /// 替换精确表条目的健康状态；键不存在时返回 `false`。
    pub fn set_health(&self, key: RouteKey, health: HealthStatus) -> bool {
        match self.table.get_mut(&key) {
            Some(mut slot) => {
                let updated = slot.value().as_ref().clone().with_health(health);
                *slot.value_mut() = Arc::new(updated);
                true
            }
            None => false,
        }
    }

    /// 记录一次到目标的测得延迟，并以条目分区（或默认分区）重新分类。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：条目上的“最近延迟 + 分区结论”供运维直接查看，同时驱动分类器计数；
    /// - **契约 (What)**：键不在精确表时返回 `None`；条目与默认分区都未声明分区时只记录延迟，
    ///   结论视为达标；
    /// - **执行 (How)**：在分片写锁内构造新条目并整体替换，读者不会看到延迟与结论不一致的中间态。
    pub fn observe_latency(&self, key: RouteKey, latency: Duration) -> Option<ZoneVerdict> {
        let mut slot = self.table.get_mut(&key)?;
        let current = slot.value().as_ref().clone();
        let verdict = current
            .zone()
            .or(self.default_zone.as_ref())
            .map_or(ZoneVerdict::InBound, |zone| {
                self.classifier.classify(zone.as_str(), latency)
            });
        *slot.value_mut() = Arc::new(current.with_measurement(latency, verdict));
        Some(verdict)
    }

    /// 整表替换域回退表。
    pub fn replace_domains(&self, domains: HashMap<DomainId, Vec<RouteEntry>>) {
        let table = DomainTable::build(domains);
        let count = table.len();
        self.domains.store(Arc::new(table));
        let revision = self.bump_revision();
        debug!(domains = count, revision, "domain fallback table replaced");
    }

    /// 整表替换区间规则及路由类型绑定。
    pub fn replace_ranges(
        &self,
        rules: Vec<RangeRule>,
        bindings: HashMap<RouteType, RouteEntry>,
    ) {
        let table = RangeTable::build(rules, bindings);
        let count = table.len();
        self.ranges.store(Arc::new(table));
        let revision = self.bump_revision();
        debug!(rules = count, revision, "range table replaced");
    }

    /// 整表替换默认链，顺序即优先级。
    pub fn replace_fallback_chain(&self, entries: Vec<RouteEntry>) {
        let chain = FallbackChain::build(entries);
        let count = chain.len();
        self.fallback.store(Arc::new(chain));
        let revision = self.bump_revision();
        debug!(entries = count, revision, "fallback chain replaced");
    }

    /// 精确表全部条目（按键排序），用于快照落盘。
    pub fn routes(&self) -> Vec<(RouteKey, Arc<RouteEntry>)> {
        let mut routes: Vec<_> = self
            .table
            .iter()
            .map(|slot| (*slot.key(), Arc::clone(slot.value())))
            .collect();
        routes.sort_unstable_by_key(|(key, _)| *key);
        routes
    }

    /// 精确表条目数。
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            routes: self.table.len(),
            domains: self.domains.load().len(),
            range_rules: self.ranges.load().len(),
            fallback_entries: self.fallback.load().len(),
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    fn bump_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn resolver() -> RouteResolver {
        let classifier = Arc::new(ZoneClassifier::new([(
            "tactical",
            Duration::from_nanos(250),
        )]));
        RouteResolver::new(DomainSlice::default(), classifier)
    }

    #[test]
    fn exact_hit_wins_over_every_fallback() {
        let resolver = resolver();
        resolver.replace_fallback_chain(vec![RouteEntry::new("default", 0)]);
        resolver.update_route(RouteKey::new(0x1234), RouteEntry::new("EndpointA", 1));

        let resolution = resolver.resolve(RouteKey::new(0x1234)).expect("精确命中");
        assert_eq!(resolution.tier(), ResolutionTier::Exact);
        assert_eq!(resolution.entry().endpoint().as_str(), "EndpointA");
    }

    #[test]
    fn fallback_order_is_domain_then_range_then_chain() {
        let resolver = resolver();
        resolver.replace_domains(HashMap::from([(
            DomainId::new(0x12),
            vec![RouteEntry::new("domain", 1)],
        )]));
        resolver.replace_ranges(
            vec![RangeRule::new(0x2000_u64, 0x2fff_u64, RouteType::ClassC)],
            HashMap::from([(RouteType::ClassC, RouteEntry::new("range", 1))]),
        );
        resolver.replace_fallback_chain(vec![
            RouteEntry::new("chain-head", 0),
            RouteEntry::new("chain-tail", 0),
        ]);

        let domain = resolver.resolve(RouteKey::new(0x1299)).expect("域回退");
        assert_eq!(domain.tier(), ResolutionTier::Domain(DomainId::new(0x12)));
        assert_eq!(domain.entry().endpoint().as_str(), "domain");

        let range = resolver.resolve(RouteKey::new(0x2345)).expect("区间回退");
        assert_eq!(range.tier(), ResolutionTier::Range(RouteType::ClassC));
        assert_eq!(range.entry().endpoint().as_str(), "range");

        let chain = resolver.resolve(RouteKey::new(0x0000)).expect("默认链");
        assert_eq!(chain.tier(), ResolutionTier::Fallback);
        assert_eq!(chain.entry().endpoint().as_str(), "chain-head");
        assert_eq!(resolver.stats().revision, 3);
    }

    #[test]
    fn unbound_range_type_falls_through_to_chain() {
        let resolver = resolver();
        resolver.replace_ranges(
            vec![RangeRule::new(0_u64, 0xffff_u64, RouteType::ClassD)],
            HashMap::new(),
        );
        resolver.replace_fallback_chain(vec![RouteEntry::new("chain", 0)]);
        let resolution = resolver.resolve(RouteKey::new(0x10)).expect("默认链");
        assert_eq!(resolution.tier(), ResolutionTier::Fallback);
    }

    #[test]
    fn miss_everywhere_is_not_found() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve(RouteKey::new(7)).map(|r| r.tier()),
            Err(ResolveError::NotFound {
                key: RouteKey::new(7),
            })
        );
    }

    #[test]
    fn update_returns_previous_and_remove_clears() {
        let resolver = resolver();
        let key = RouteKey::new(42);
        assert!(resolver.update_route(key, RouteEntry::new("a", 1)).is_none());
        let previous = resolver
            .update_route(key, RouteEntry::new("b", 2))
            .expect("应返回旧条目");
        assert_eq!(previous.endpoint().as_str(), "a");
        assert_eq!(
            resolver.resolve(key).expect("命中").entry().endpoint().as_str(),
            "b"
        );
        assert!(resolver.remove_route(key).is_some());
        assert!(resolver.is_empty());
    }

    #[test]
    fn observe_latency_reclassifies_entry() {
        let resolver = resolver();
        let key = RouteKey::new(1);
        resolver.update_route(key, RouteEntry::new("a", 1).with_zone("tactical"));

        let verdict = resolver.observe_latency(key, Duration::from_nanos(300));
        assert_eq!(verdict, Some(ZoneVerdict::Violation));
        let entry = resolver.resolve(key).expect("命中").into_entry();
        assert_eq!(entry.latency(), Some(Duration::from_nanos(300)));
        assert_eq!(entry.verdict(), Some(ZoneVerdict::Violation));
        assert_eq!(resolver.classifier.violations("tactical"), 1);

        assert_eq!(
            resolver.observe_latency(RouteKey::new(2), Duration::ZERO),
            None
        );
    }

    #[test]
    fn set_health_replaces_whole_entry() {
        let resolver = resolver();
        let key = RouteKey::new(5);
        resolver.update_route(key, RouteEntry::new("a", 3));
        assert!(resolver.set_health(key, HealthStatus::Degraded));
        let entry = resolver.resolve(key).expect("命中").into_entry();
        assert_eq!(entry.health(), HealthStatus::Degraded);
        assert_eq!(entry.priority(), 3);
        assert!(!resolver.set_health(RouteKey::new(6), HealthStatus::Healthy));
    }

    #[test]
    fn readers_never_observe_torn_entries() {
        let resolver = Arc::new(resolver());
        let key = RouteKey::new(0xbeef);
        resolver.update_route(key, RouteEntry::new("gen-0", 0));

        let writer = {
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                for generation in 1..=500_u32 {
                    resolver.update_route(
                        key,
                        RouteEntry::new(format!("gen-{generation}"), generation),
                    );
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let entry = resolver.resolve(key).expect("键始终存在").into_entry();
                        assert_eq!(
                            entry.endpoint().as_str(),
                            format!("gen-{}", entry.priority()),
                            "端点与优先级必须来自同一次写入"
                        );
                    }
                })
            })
            .collect();

        writer.join().expect("写线程不应 panic");
        for reader in readers {
            reader.join().expect("读线程不应 panic");
        }
        assert_eq!(
            resolver.resolve(key).expect("命中").entry().endpoint().as_str(),
            "gen-500"
        );
    }
}
