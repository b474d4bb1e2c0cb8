//! # 配置：`DispatchConfig`
//!
//! ## 角色定位（Why）
//! - 端口区间、复制因子、域位段与延迟分区上限都属于“管理员配置、运行期不计算”的静态参数；
//! - 统一以 TOML 描述，启动时一次性解析与校验，非法配置在构造组件之前就被拒绝。
//!
//! ## 文件结构（What）
//! ```toml
//! [allocator]
//! min_port = 40000
//! max_port = 40999
//!
//! [ring]
//! replication_factor = 3
//! vnodes_per_weight = 64
//!
//! [[ring.nodes]]
//! id = "node-0"
//! endpoint = "10.0.0.1:7000"
//! weight = 1
//!
//! [resolver]
//! domain_shift = 8
//! domain_bits = 8
//!
//! [store]
//! retrieve_timeout_ms = 500
//!
//! [zones.ceilings_ns]
//! tactical = 250
//!
//! [zones.operations]
//! resolve = "tactical"
//! update = "operational"
//! ```
//! 所有段落都可省略，缺省值见各结构体的 `Default` 实现。

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocator::PortRange;
use crate::error::ConfigError;
use crate::ids::ZoneName;
use crate::resolver::DomainSlice;
use crate::ring::{HashRing, Node};
use crate::zone::ZoneClassifier;

/// 默认分区：战术级（纳秒）、运营级（毫秒）、战略级（百毫秒）。
pub const DEFAULT_ZONE_CEILINGS_NS: [(&str, u64); 3] = [
    ("tactical", 250),
    ("operational", 1_000_000),
    ("strategic", 100_000_000),
];

/// 路由层整体配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub allocator: AllocatorConfig,
    pub ring: RingConfig,
    pub resolver: ResolverConfig,
    pub store: StoreConfig,
    pub zones: ZonesConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocatorConfig {
    pub min_port: u16,
    pub max_port: u16,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            min_port: 40_000,
            max_port: 40_999,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RingConfig {
    pub replication_factor: usize,
    pub vnodes_per_weight: u32,
    /// 启动拓扑；可以为空，由管理操作稍后加入节点。
    pub nodes: Vec<Node>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            vnodes_per_weight: 64,
            nodes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    pub domain_shift: u8,
    pub domain_bits: u8,
    /// 条目未声明分区时用于延迟观测的分区。
    pub default_zone: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            domain_shift: 8,
            domain_bits: 8,
            default_zone: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// `retrieve` 未显式给出截止时间时使用的整体超时。
    pub retrieve_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retrieve_timeout_ms: 500,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZonesConfig {
    /// 分区名 → 上限（纳秒）。
    pub ceilings_ns: BTreeMap<String, u64>,
    pub operations: OperationZones,
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            ceilings_ns: DEFAULT_ZONE_CEILINGS_NS
                .iter()
                .map(|(zone, ceiling)| ((*zone).to_owned(), *ceiling))
                .collect(),
            operations: OperationZones::default(),
        }
    }
}

/// 门面为每类操作计时所归属的分区。
///
/// - `update`：`update_route`、`remove_route`；
/// - `release`：`release`、`release_owner`、`sweep_expired`；
/// - `place`：只计算落点、不触达节点的 `place`。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationZones {
    pub resolve: String,
    pub update: String,
    pub place: String,
    pub allocate: String,
    pub release: String,
    pub reserve: String,
    pub store: String,
    pub retrieve: String,
}

impl OperationZones {
    /// （操作名, 分区名）列表，用于校验与门面装配。
    pub fn entries(&self) -> [(&'static str, &str); 8] {
        [
            ("resolve", self.resolve.as_str()),
            ("update", self.update.as_str()),
            ("place", self.place.as_str()),
            ("allocate", self.allocate.as_str()),
            ("release", self.release.as_str()),
            ("reserve", self.reserve.as_str()),
            ("store", self.store.as_str()),
            ("retrieve", self.retrieve.as_str()),
        ]
    }
}

impl Default for OperationZones {
    fn default() -> Self {
        Self {
            resolve: "tactical".to_owned(),
            update: "operational".to_owned(),
            place: "operational".to_owned(),
            allocate: "operational".to_owned(),
            release: "operational".to_owned(),
            reserve: "operational".to_owned(),
            store: "strategic".to_owned(),
            retrieve: "strategic".to_owned(),
        }
    }
}

impl DispatchConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取、解析并校验 TOML 文件。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验字段之间的约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port_range()?;
        self.domain_slice()?;
        if self.ring.replication_factor == 0 {
            return Err(ConfigError::Invalid {
                field: "ring.replication_factor",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.ring.vnodes_per_weight == 0 {
            return Err(ConfigError::Invalid {
                field: "ring.vnodes_per_weight",
                reason: "must be at least 1".to_owned(),
            });
        }
        self.hash_ring()?;
        if self.store.retrieve_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "store.retrieve_timeout_ms",
                reason: "must be positive".to_owned(),
            });
        }

        for (operation, zone) in self.zones.operations.entries() {
            if !self.zones.ceilings_ns.contains_key(zone) {
                return Err(ConfigError::UnknownZone {
                    operation,
                    zone: zone.to_owned(),
                });
            }
        }
        if let Some(zone) = &self.resolver.default_zone
            && !self.zones.ceilings_ns.contains_key(zone)
        {
            return Err(ConfigError::UnknownZone {
                operation: "resolver.default_zone",
                zone: zone.clone(),
            });
        }
        Ok(())
    }

    pub fn port_range(&self) -> Result<PortRange, ConfigError> {
        PortRange::new(self.allocator.min_port, self.allocator.max_port).ok_or_else(|| {
            ConfigError::Invalid {
                field: "allocator.min_port",
                reason: format!(
                    "min_port {} exceeds max_port {}",
                    self.allocator.min_port, self.allocator.max_port
                ),
            }
        })
    }

    pub fn domain_slice(&self) -> Result<DomainSlice, ConfigError> {
        DomainSlice::new(self.resolver.domain_shift, self.resolver.domain_bits).ok_or_else(|| {
            ConfigError::Invalid {
                field: "resolver.domain_bits",
                reason: format!(
                    "slice of {} bits at shift {} must be 1..=16 bits wide and fit in 64 bits",
                    self.resolver.domain_bits, self.resolver.domain_shift
                ),
            }
        })
    }

    /// 依据 `[ring]` 段构造哈希环；重复节点或零权重节点被视为配置错误。
    pub fn hash_ring(&self) -> Result<HashRing, ConfigError> {
        HashRing::with_nodes(
            self.ring.replication_factor,
            self.ring.vnodes_per_weight,
            self.ring.nodes.iter().cloned(),
        )
        .map_err(|err| ConfigError::Invalid {
            field: "ring.nodes",
            reason: err.to_string(),
        })
    }

    /// 依据上限表构造分类器。
    pub fn classifier(&self) -> ZoneClassifier {
        ZoneClassifier::new(
            self.zones
                .ceilings_ns
                .iter()
                .map(|(zone, ceiling)| (ZoneName::from(zone.as_str()), Duration::from_nanos(*ceiling))),
        )
    }

    pub fn retrieve_timeout(&self) -> Duration {
        Duration::from_millis(self.store.retrieve_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = DispatchConfig::from_toml_str("").expect("空文档使用默认值");
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.port_range().expect("默认区间合法").len(), 1_000);
    }

    #[test]
    fn partial_document_overrides_selected_fields() {
        let config = DispatchConfig::from_toml_str(
            r#"
            [allocator]
            min_port = 2000
            max_port = 2010

            [zones.ceilings_ns]
            tactical = 250
            bulk = 5000000

            [zones.operations]
            resolve = "tactical"
            update = "tactical"
            place = "tactical"
            allocate = "tactical"
            release = "tactical"
            reserve = "tactical"
            store = "bulk"
            retrieve = "bulk"
            "#,
        )
        .expect("配置合法");
        assert_eq!(config.port_range().expect("区间").len(), 11);
        assert_eq!(config.ring.replication_factor, 3);
        let classifier = config.classifier();
        assert_eq!(
            classifier.ceiling("bulk"),
            Some(Duration::from_millis(5))
        );
        assert!(!classifier.contains("strategic"), "显式上限表整体替换默认值");
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let err = DispatchConfig::from_toml_str(
            "[allocator]\nmin_port = 10\nmax_port = 9\n",
        )
        .expect_err("区间倒置");
        assert_eq!(err.code(), "dispatch.config.invalid");
    }

    #[test]
    fn operations_must_reference_known_zones() {
        let err = DispatchConfig::from_toml_str(
            "[zones.operations]\nresolve = \"hyperspace\"\n",
        )
        .expect_err("未知分区");
        assert!(matches!(
            err,
            ConfigError::UnknownZone {
                operation: "resolve",
                ..
            }
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = DispatchConfig::from_toml_str("[ring]\nreplicas = 2\n").expect_err("未知字段");
        assert_eq!(err.code(), "dispatch.config.parse");
    }

    #[test]
    fn zero_replication_is_rejected() {
        let err = DispatchConfig::from_toml_str("[ring]\nreplication_factor = 0\n")
            .expect_err("复制因子为 0");
        assert!(err.to_string().contains("ring.replication_factor"));
    }

    #[test]
    fn ring_nodes_build_the_startup_topology() {
        let config = DispatchConfig::from_toml_str(
            r#"
            [ring]
            replication_factor = 2

            [[ring.nodes]]
            id = "a"
            endpoint = "10.0.0.1:7000"
            weight = 1

            [[ring.nodes]]
            id = "b"
            endpoint = "10.0.0.2:7000"
            weight = 2
            "#,
        )
        .expect("配置合法");
        let ring = config.hash_ring().expect("拓扑合法");
        assert_eq!(ring.nodes().len(), 2);
        assert_eq!(ring.place(b"obj1").len(), 2);
    }

    #[test]
    fn duplicate_ring_nodes_are_rejected() {
        let err = DispatchConfig::from_toml_str(
            r#"
            [[ring.nodes]]
            id = "a"
            endpoint = "x:1"
            weight = 1

            [[ring.nodes]]
            id = "a"
            endpoint = "y:1"
            weight = 1
            "#,
        )
        .expect_err("重复节点");
        assert!(err.to_string().contains("ring.nodes"));
    }

    #[test]
    fn operations_left_out_fall_back_to_default_zones() {
        let err = DispatchConfig::from_toml_str(
            r#"
            [zones.ceilings_ns]
            strategic = 100000000

            [zones.operations]
            resolve = "strategic"
            allocate = "strategic"
            store = "strategic"
            retrieve = "strategic"
            "#,
        )
        .expect_err("缺省的 update 分区不在上限表中");
        assert!(matches!(
            err,
            ConfigError::UnknownZone {
                operation: "update",
                ..
            }
        ));
    }

    #[test]
    fn oversized_node_weight_is_rejected() {
        let err = DispatchConfig::from_toml_str(
            r#"
            [[ring.nodes]]
            id = "a"
            endpoint = "10.0.0.1:7000"
            weight = 4000000000
            "#,
        )
        .expect_err("虚拟节点数超限");
        assert_eq!(err.code(), "dispatch.config.invalid");
        assert!(err.to_string().contains("virtual nodes"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = DispatchConfig::from_path("/nonexistent/spark-dispatch.toml")
            .expect_err("文件不存在");
        assert!(err.to_string().contains("/nonexistent/spark-dispatch.toml"));
    }
}
