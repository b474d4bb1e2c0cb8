//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义同步核心对外暴露的错误语义：解析未命中、端口耗尽/冲突、拓扑非法与配置非法；
//! - 每个错误提供稳定的点分错误码（`dispatch.*`），便于外部编排器与告警系统按码聚合。
//!
//! ## 设计要求（What）
//! - 全部派生 `thiserror::Error`；
//! - 核心从不在内部重试，`is_retryable` 只是给调用方的提示；
//! - 延迟分区违规不是错误，只体现为计数器。

use std::path::PathBuf;

use thiserror::Error;

use crate::ids::{NodeId, OwnerId};
use crate::resolver::RouteKey;

/// 路由解析失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// 精确表、域回退、区间回退与默认链全部未命中。
    ///
    /// - **契约 (What)**：终态错误，核心不会重试；是否换键或稍后再试由调用方决定。
    #[error("no route for key {key}")]
    NotFound { key: RouteKey },
}

impl ResolveError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::NotFound { .. } => "dispatch.resolve.not_found",
        }
    }
}

/// 端口分配器错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：耗尽（`Exhausted`）是需要上报给编排器的容量信号，必须与普通冲突区分；
/// - **契约 (What)**：所有变体都携带足够的上下文（端口、持有者、区间），便于排障。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    /// 环形扫描完整绕回起点仍未找到空闲端口。
    #[error("port range {min}..={max} is exhausted")]
    Exhausted { min: u16, max: u16 },

    /// 预留的端口已被其他所有者占用或预留。
    #[error("port {port} is already held by `{holder}`")]
    Conflict { port: u16, holder: OwnerId },

    /// 同一所有者已经预留了另一个端口。
    #[error("owner `{owner}` already reserved port {port}")]
    AlreadyReserved { owner: OwnerId, port: u16 },

    /// 端口不在分配器管理的区间内。
    #[error("port {port} is outside of {min}..={max}")]
    OutOfRange { port: u16, min: u16, max: u16 },
}

impl AllocError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            AllocError::Exhausted { .. } => "dispatch.allocate.exhausted",
            AllocError::Conflict { .. } => "dispatch.allocate.conflict",
            AllocError::AlreadyReserved { .. } => "dispatch.allocate.already_reserved",
            AllocError::OutOfRange { .. } => "dispatch.allocate.out_of_range",
        }
    }

    /// 耗尽在端口释放后可能恢复；冲突与越界需要调用方修正输入。
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocError::Exhausted { .. })
    }
}

/// 哈希环拓扑变更失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("node `{id}` is already part of the ring")]
    DuplicateNode { id: NodeId },

    #[error("node `{id}` is not part of the ring")]
    NodeNotFound { id: NodeId },

    #[error("node `{id}` has zero weight")]
    ZeroWeight { id: NodeId },

    /// `vnodes_per_weight * weight` 超出单节点上限。
    #[error("node `{id}` would expand to {vnodes} virtual nodes (max {max})")]
    TooManyVirtualNodes { id: NodeId, vnodes: u64, max: u64 },
}

impl TopologyError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TopologyError::DuplicateNode { .. } => "dispatch.ring.duplicate_node",
            TopologyError::NodeNotFound { .. } => "dispatch.ring.node_not_found",
            TopologyError::ZeroWeight { .. } => "dispatch.ring.zero_weight",
            TopologyError::TooManyVirtualNodes { .. } => "dispatch.ring.too_many_vnodes",
        }
    }
}

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// 字段取值违反约束，`field` 为 TOML 中的点分路径。
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("operation `{operation}` refers to unknown zone `{zone}`")]
    UnknownZone {
        operation: &'static str,
        zone: String,
    },
}

impl ConfigError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "dispatch.config.io",
            ConfigError::Parse(_) => "dispatch.config.parse",
            ConfigError::Invalid { .. } => "dispatch.config.invalid",
            ConfigError::UnknownZone { .. } => "dispatch.config.unknown_zone",
        }
    }
}
