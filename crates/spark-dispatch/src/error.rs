//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 门面的组合调用（`dispatch`、`open_endpoint`）跨越多个组件，失败时必须说明是哪一阶段出错；
//! - 快照读写涉及文件系统、JSON 与分配器恢复，统一归入 [`SnapshotError`]。
//!
//! ## 设计要求（What）
//! - 组件错误原样包裹，`code()` 与 `is_retryable()` 透传组件语义；
//! - `stage()` 返回稳定的阶段名，便于日志与告警按阶段聚合。

use std::path::PathBuf;

use spark_dispatch_core::{AllocError, ConfigError, ResolveError};
use spark_dispatch_store::{RetrieveError, StoreError};
use thiserror::Error;

/// 门面调用失败，变体即失败阶段。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("resolve stage failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("store stage failed: {0}")]
    Store(#[from] StoreError),

    #[error("retrieve stage failed: {0}")]
    Retrieve(#[from] RetrieveError),

    #[error("allocate stage failed: {0}")]
    Allocate(#[from] AllocError),
}

impl DispatchError {
    /// 失败阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            DispatchError::Resolve(_) => "resolve",
            DispatchError::Store(_) => "store",
            DispatchError::Retrieve(_) => "retrieve",
            DispatchError::Allocate(_) => "allocate",
        }
    }

    /// 底层组件的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Resolve(err) => err.code(),
            DispatchError::Store(err) => err.code(),
            DispatchError::Retrieve(err) => err.code(),
            DispatchError::Allocate(err) => err.code(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Resolve(_) => false,
            DispatchError::Store(err) => err.is_retryable(),
            DispatchError::Retrieve(err) => err.is_retryable(),
            DispatchError::Allocate(err) => err.is_retryable(),
        }
    }
}

/// 快照落盘与恢复失败。
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot i/o on `{}` failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 快照中的分配记录与配置的端口区间不符或互相冲突。
    #[error("snapshot allocations rejected: {0}")]
    Allocation(#[from] AllocError),
}

impl SnapshotError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SnapshotError::Io { .. } => "dispatch.snapshot.io",
            SnapshotError::Json(_) => "dispatch.snapshot.json",
            SnapshotError::Config(err) => err.code(),
            SnapshotError::Allocation(_) => "dispatch.snapshot.allocation",
        }
    }
}
