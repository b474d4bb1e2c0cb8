//! 复制存储的错误域。
//!
//! - **意图 (Why)**：单节点 I/O 失败（[`NodeIoError`]）与整次存取的结论（[`StoreError`] /
//!   [`RetrieveError`]）分层表达，调用方既能看到聚合结论，也能逐个定位失败副本；
//! - **契约 (What)**：错误码沿用 `dispatch.*` 点分约定；存储层从不内部重试，
//!   `is_retryable` 仅是给调用方的提示。

use spark_dispatch_core::NodeId;
use thiserror::Error;

use crate::transport::ObjectKey;

/// 单个节点上的一次读写失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NodeIoError {
    #[error("node `{node}` is unreachable")]
    Unreachable { node: NodeId },

    /// 节点可达，但拒绝了本次请求（例如只读）。
    #[error("node `{node}` rejected the request: {reason}")]
    Rejected { node: NodeId, reason: String },
}

/// 某个落点副本上的失败记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaFailure {
    /// 在落点列表中的序号，0 为主节点。
    pub rank: usize,
    pub node: NodeId,
    pub error: NodeIoError,
}

/// `store` 未能写满全部落点。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// 至少一个节点写入成功，但并非全部。
    #[error(
        "object replicated to {} of {} nodes",
        .written.len(),
        .written.len() + .failed.len()
    )]
    PartialReplication {
        written: Vec<NodeId>,
        failed: Vec<ReplicaFailure>,
    },

    /// 全部落点写入失败。
    #[error("object could not be written to any of {} nodes", .failed.len())]
    TotalFailure { failed: Vec<ReplicaFailure> },

    #[error("hash ring has no nodes")]
    EmptyRing,
}

impl StoreError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::PartialReplication { .. } => "dispatch.store.partial_replication",
            StoreError::TotalFailure { .. } => "dispatch.store.total_failure",
            StoreError::EmptyRing => "dispatch.store.empty_ring",
        }
    }

    /// 部分复制时对象已经落盘，是否补写由调用方决定，因此不标记为可重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::TotalFailure { .. } | StoreError::EmptyRing)
    }
}

/// `retrieve` 未能取回对象。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RetrieveError {
    /// 每一个落点都明确回答“不存在”。
    #[error("object `{key}` not found on any placement node")]
    NotFound { key: ObjectKey },

    /// 至少一个落点不可达且没有任何落点返回对象。
    #[error("object unavailable: {} placement nodes failed", .failed.len())]
    Unavailable { failed: Vec<ReplicaFailure> },

    /// 截止时间先于回退循环结束到达。
    #[error("retrieve deadline exceeded after {attempted} attempts")]
    DeadlineExceeded { attempted: usize },

    #[error("hash ring has no nodes")]
    EmptyRing,
}

impl RetrieveError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RetrieveError::NotFound { .. } => "dispatch.retrieve.not_found",
            RetrieveError::Unavailable { .. } => "dispatch.retrieve.unavailable",
            RetrieveError::DeadlineExceeded { .. } => "dispatch.retrieve.deadline_exceeded",
            RetrieveError::EmptyRing => "dispatch.retrieve.empty_ring",
        }
    }

    /// 只有 `NotFound` 是确定结论，其余均属 I/O 类失败，可稍后重试。
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetrieveError::NotFound { .. })
    }
}
