//! 内存版 [`NodeTransport`]：用于测试与单进程嵌入。
//!
//! - **意图 (Why)**：以确定性的开关替代随机故障注入，测试可以精确指定“哪个节点不可达、哪个节点变慢”；
//! - **契约 (What)**：克隆体共享同一份状态；不可达节点的读写都返回 [`NodeIoError::Unreachable`]，
//!   只读节点的写入返回 [`NodeIoError::Rejected`]；每次调用都记录在调用日志中，便于断言访问顺序。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use spark_dispatch_core::{Node, NodeId};

use crate::error::NodeIoError;
use crate::transport::{NodeTransport, ObjectKey};

/// 调用日志中的操作类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportOp {
    Put,
    Get,
}

/// 调用日志的一行。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportCall {
    pub op: TransportOp,
    pub node: NodeId,
    pub key: ObjectKey,
}

#[derive(Debug, Default)]
struct Inner {
    objects: DashMap<(NodeId, ObjectKey), Bytes>,
    unreachable: Mutex<HashSet<NodeId>>,
    read_only: Mutex<HashSet<NodeId>>,
    latency: DashMap<NodeId, Duration>,
    calls: Mutex<Vec<TransportCall>>,
}

/// 以 `DashMap` 保存 `(节点, 键) → 对象` 的内存传输层。
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切换节点可达性。
    pub fn set_reachable(&self, node: &NodeId, reachable: bool) {
        let mut unreachable = self.inner.unreachable.lock();
        if reachable {
            unreachable.remove(node);
        } else {
            unreachable.insert(node.clone());
        }
    }

    /// 只读节点仍可读取，但拒绝写入。
    pub fn set_read_only(&self, node: &NodeId, read_only: bool) {
        let mut nodes = self.inner.read_only.lock();
        if read_only {
            nodes.insert(node.clone());
        } else {
            nodes.remove(node);
        }
    }

    /// 为节点的每次调用注入固定延迟；`Duration::ZERO` 表示移除。
    pub fn set_latency(&self, node: &NodeId, latency: Duration) {
        if latency.is_zero() {
            self.inner.latency.remove(node);
        } else {
            self.inner.latency.insert(node.clone(), latency);
        }
    }

    /// 直接读取节点上保存的对象，不经过可达性开关，也不记入日志。
    pub fn object(&self, node: &NodeId, key: &ObjectKey) -> Option<Bytes> {
        self.inner
            .objects
            .get(&(node.clone(), key.clone()))
            .map(|entry| entry.value().clone())
    }

    /// 节点上保存的对象数量。
    pub fn object_count(&self, node: &NodeId) -> usize {
        self.inner
            .objects
            .iter()
            .filter(|entry| &entry.key().0 == node)
            .count()
    }

    /// 按发生顺序返回全部调用。
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// 记录调用、施加延迟并检查可达性。
    async fn enter(&self, op: TransportOp, node: &Node, key: &ObjectKey) -> Result<(), NodeIoError> {
        self.inner.calls.lock().push(TransportCall {
            op,
            node: node.id.clone(),
            key: key.clone(),
        });
        // 读出副本后立即释放分片，不跨 await 持有。
        let latency = self.inner.latency.get(&node.id).map(|entry| *entry.value());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.unreachable.lock().contains(&node.id) {
            return Err(NodeIoError::Unreachable {
                node: node.id.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeTransport for MemoryTransport {
    async fn put(&self, node: &Node, key: &ObjectKey, payload: Bytes) -> Result<(), NodeIoError> {
        self.enter(TransportOp::Put, node, key).await?;
        if self.inner.read_only.lock().contains(&node.id) {
            return Err(NodeIoError::Rejected {
                node: node.id.clone(),
                reason: "node is read-only".to_owned(),
            });
        }
        self.inner
            .objects
            .insert((node.id.clone(), key.clone()), payload);
        Ok(())
    }

    async fn get(&self, node: &Node, key: &ObjectKey) -> Result<Option<Bytes>, NodeIoError> {
        self.enter(TransportOp::Get, node, key).await?;
        Ok(self.object(&node.id, key))
    }
}
