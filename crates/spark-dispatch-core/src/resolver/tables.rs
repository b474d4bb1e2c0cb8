//! 回退层级使用的只读表。
//!
//! 三张表都在稳态下只读，由管理操作整表构建后交给 `ArcSwap` 发布；
//! 构建时完成排序与校验，查询路径不做任何分配。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entry::{RouteEntry, RouteKey};

/// 域标识：从路由键中切出的固定位段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(u16);

impl DomainId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

/// 域位段约定：`domain = (key >> shift) & ((1 << bits) - 1)`。
///
/// - **契约 (What)**：`bits` 取值 1..=16，`shift + bits <= 64`；越界参数在构造时被拒绝；
/// - **来源**：位段约定由外部分类层给出，本层只负责切片。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainSlice {
    shift: u8,
    bits: u8,
}

impl DomainSlice {
    pub const fn new(shift: u8, bits: u8) -> Option<Self> {
        if bits == 0 || bits > 16 || shift as u16 + bits as u16 > 64 {
            return None;
        }
        Some(Self { shift, bits })
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn domain_of(&self, key: RouteKey) -> DomainId {
        let mask = (1_u64 << self.bits) - 1;
        // bits <= 16，掩码后的值必然落在 u16 内。
        #[allow(clippy::cast_possible_truncation)]
        let raw = ((key.get() >> self.shift) & mask) as u16;
        DomainId(raw)
    }
}

impl Default for DomainSlice {
    /// 默认取第 8..16 位。
    fn default() -> Self {
        Self { shift: 8, bits: 8 }
    }
}

/// 域回退表：每个域一份按优先级降序排列的候选列表。
#[derive(Debug, Default)]
pub(crate) struct DomainTable {
    entries: HashMap<DomainId, Vec<Arc<RouteEntry>>>,
}

impl DomainTable {
    /// 构建时按优先级稳定降序排序；空列表直接丢弃。
    pub(crate) fn build(domains: HashMap<DomainId, Vec<RouteEntry>>) -> Self {
        let entries = domains
            .into_iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(domain, mut list)| {
                list.sort_by(|left, right| right.priority().cmp(&left.priority()));
                (domain, list.into_iter().map(Arc::new).collect())
            })
            .collect();
        Self { entries }
    }

    pub(crate) fn head(&self, domain: DomainId) -> Option<&Arc<RouteEntry>> {
        self.entries.get(&domain).and_then(|list| list.first())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 区间回退使用的路由类型（Class A/B/C/D 风格的封闭枚举）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    ClassA,
    ClassB,
    ClassC,
    ClassD,
}

/// 闭区间 `[start, end]` 到路由类型的规则。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRule {
    pub start: RouteKey,
    pub end: RouteKey,
    pub route_type: RouteType,
}

impl RangeRule {
    pub fn new(start: impl Into<RouteKey>, end: impl Into<RouteKey>, route_type: RouteType) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            route_type,
        }
    }

    pub fn contains(&self, key: RouteKey) -> bool {
        self.start <= key && key <= self.end
    }
}

/// 区间表：规则按给定顺序线性扫描，第一个包含键的规则胜出。
#[derive(Debug, Default)]
pub(crate) struct RangeTable {
    rules: Vec<RangeRule>,
    bindings: HashMap<RouteType, Arc<RouteEntry>>,
}

/// 区间表命中的结果。
pub(crate) enum RangeHit<'a> {
    /// 命中规则且路由类型已绑定目标。
    Bound(RouteType, &'a Arc<RouteEntry>),
    /// 命中规则，但其路由类型尚未绑定目标。
    Unbound(RouteType),
    Miss,
}

impl RangeTable {
    pub(crate) fn build(rules: Vec<RangeRule>, bindings: HashMap<RouteType, RouteEntry>) -> Self {
        Self {
            rules,
            bindings: bindings
                .into_iter()
                .map(|(route_type, entry)| (route_type, Arc::new(entry)))
                .collect(),
        }
    }

    pub(crate) fn lookup(&self, key: RouteKey) -> RangeHit<'_> {
        match self.rules.iter().find(|rule| rule.contains(key)) {
            Some(rule) => match self.bindings.get(&rule.route_type) {
                Some(entry) => RangeHit::Bound(rule.route_type, entry),
                None => RangeHit::Unbound(rule.route_type),
            },
            None => RangeHit::Miss,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }
}

/// 最后兜底的默认链，顺序即优先级。
#[derive(Debug, Default)]
pub(crate) struct FallbackChain {
    entries: Vec<Arc<RouteEntry>>,
}

impl FallbackChain {
    pub(crate) fn build(entries: Vec<RouteEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }

    pub(crate) fn head(&self) -> Option<&Arc<RouteEntry>> {
        self.entries.first()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
