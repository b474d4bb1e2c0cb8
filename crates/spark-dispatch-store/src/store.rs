//! # ReplicatedStore：按环序复制与确定性回退
//!
//! ## 核心意图（Why）
//! - 写入时把对象顺序写到主节点与 `R-1` 个副本，读取时按同一顺序回退，第一个成功者胜出；
//! - 所有副本顺序只由哈希环决定，同一拓扑下任意进程都会访问同一串节点。
//!
//! ## 行为契约（What）
//! - `store`：主节点优先、随后按环序写副本；全部成功返回 [`StoreReceipt`]，
//!   部分成功返回 [`StoreError::PartialReplication`]，全部失败返回 [`StoreError::TotalFailure`]；
//! - `retrieve`：截止时间约束整个回退循环；超时即返回 [`RetrieveError::DeadlineExceeded`]，
//!   即使仍有副本未尝试；只有每个落点都回答“不存在”时才返回 [`RetrieveError::NotFound`]。
//!
//! ## 实现策略（How）
//! - 先从环快照解析出完整的节点列表，再开始任何 `.await`；快照只是 `Arc`，不涉及锁；
//! - 截止时间由 `tokio::time::timeout_at` 包裹整个循环实现，已尝试次数通过原子计数在取消后读取。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use spark_dispatch_core::{HashRing, Node, NodeId};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ReplicaFailure, RetrieveError, StoreError};
use crate::transport::{NodeTransport, ObjectKey};

/// 完整复制成功的回执。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreReceipt {
    pub key: ObjectKey,
    /// 按写入顺序排列，首项为主节点。
    pub written: Vec<NodeId>,
}

impl StoreReceipt {
    pub fn primary(&self) -> Option<&NodeId> {
        self.written.first()
    }
}

/// 基于哈希环的复制存储。
///
/// # 教案式注释
/// - **意图 (Why)**：环与传输层都以 `Arc` 注入，存储本身不持有可变状态，可被任意多个任务共享；
/// - **契约 (What)**：不做内部重试，不做读修复，失败细节全部交给调用方；
/// - **风险 (Trade-offs)**：写入串行执行，延迟为各副本延迟之和，换取确定的写入顺序。
#[derive(Clone)]
pub struct ReplicatedStore {
    ring: Arc<HashRing>,
    transport: Arc<dyn NodeTransport>,
}

impl std::fmt::Debug for ReplicatedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStore")
            .field("ring", &self.ring)
            .finish_non_exhaustive()
    }
}

impl ReplicatedStore {
    pub fn new(ring: Arc<HashRing>, transport: Arc<dyn NodeTransport>) -> Self {
        Self { ring, transport }
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }

    /// 键在当前拓扑下的落点节点，主节点在前。
    pub fn placement(&self, key: &ObjectKey) -> Vec<Node> {
        let snapshot = self.ring.snapshot();
        snapshot
            .place(key.as_bytes())
            .into_iter()
            .filter_map(|index| snapshot.node(index).cloned())
            .collect()
    }

    /// 写入主节点与全部副本。
    pub async fn store(&self, key: &ObjectKey, payload: Bytes) -> Result<StoreReceipt, StoreError> {
        let targets = self.placement(key);
        if targets.is_empty() {
            return Err(StoreError::EmptyRing);
        }

        let mut written = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();
        for (rank, node) in targets.iter().enumerate() {
            match self.transport.put(node, key, payload.clone()).await {
                Ok(()) => written.push(node.id.clone()),
                Err(error) => {
                    warn!(%key, node = %node.id, rank, %error, "replica write failed");
                    failed.push(ReplicaFailure {
                        rank,
                        node: node.id.clone(),
                        error,
                    });
                }
            }
        }

        if failed.is_empty() {
            debug!(%key, replicas = written.len(), "object stored");
            return Ok(StoreReceipt {
                key: key.clone(),
                written,
            });
        }
        if written.is_empty() {
            return Err(StoreError::TotalFailure { failed });
        }
        Err(StoreError::PartialReplication { written, failed })
    }

    /// 在截止时间前按环序读取对象。
    pub async fn retrieve(&self, key: &ObjectKey, deadline: Instant) -> Result<Bytes, RetrieveError> {
        let targets = self.placement(key);
        if targets.is_empty() {
            return Err(RetrieveError::EmptyRing);
        }
        if Instant::now() >= deadline {
            return Err(RetrieveError::DeadlineExceeded { attempted: 0 });
        }

        let attempted = AtomicUsize::new(0);
        let fallback = async {
            let mut failed = Vec::new();
            for (rank, node) in targets.iter().enumerate() {
                attempted.fetch_add(1, Ordering::Relaxed);
                match self.transport.get(node, key).await {
                    Ok(Some(payload)) => {
                        if rank > 0 {
                            debug!(%key, node = %node.id, rank, "object served by replica");
                        }
                        return Ok(payload);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(%key, node = %node.id, rank, %error, "replica read failed");
                        failed.push(ReplicaFailure {
                            rank,
                            node: node.id.clone(),
                            error,
                        });
                    }
                }
            }
            if failed.is_empty() {
                Err(RetrieveError::NotFound { key: key.clone() })
            } else {
                Err(RetrieveError::Unavailable { failed })
            }
        };

        match tokio::time::timeout_at(deadline, fallback).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let attempted = attempted.load(Ordering::Relaxed);
                warn!(%key, attempted, "retrieve deadline exceeded");
                Err(RetrieveError::DeadlineExceeded { attempted })
            }
        }
    }

    /// 以相对超时读取对象。
    pub async fn retrieve_within(
        &self,
        key: &ObjectKey,
        timeout: Duration,
    ) -> Result<Bytes, RetrieveError> {
        self.retrieve(key, Instant::now() + timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeIoError;
    use crate::memory::MemoryTransport;
    use tracing_test::traced_test;

    fn fixture(count: usize) -> (ReplicatedStore, MemoryTransport) {
        let nodes = (0..count).map(|i| Node::new(format!("n{i}"), format!("10.2.0.{i}:7000"), 1));
        let ring = Arc::new(HashRing::with_nodes(3, 16, nodes).expect("拓扑合法"));
        let transport = MemoryTransport::new();
        let store = ReplicatedStore::new(ring, Arc::new(transport.clone()));
        (store, transport)
    }

    #[tokio::test]
    async fn full_replication_writes_every_placement_node() {
        let (store, transport) = fixture(5);
        let key = ObjectKey::from("obj1");
        let receipt = store
            .store(&key, Bytes::from_static(b"payload"))
            .await
            .expect("全部节点可达");

        let placement: Vec<NodeId> = store.placement(&key).into_iter().map(|n| n.id).collect();
        assert_eq!(receipt.written, placement);
        for node in &placement {
            assert_eq!(
                transport.object(node, &key),
                Some(Bytes::from_static(b"payload"))
            );
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn unreachable_replica_yields_partial_replication() {
        let (store, transport) = fixture(5);
        let key = ObjectKey::from("obj2");
        let placement = store.placement(&key);
        transport.set_reachable(&placement[1].id, false);

        let err = store
            .store(&key, Bytes::from_static(b"x"))
            .await
            .expect_err("一个副本不可达");
        match err {
            StoreError::PartialReplication { written, failed } => {
                assert_eq!(written, vec![placement[0].id.clone(), placement[2].id.clone()]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].rank, 1);
            }
            other => panic!("意外错误: {other:?}"),
        }
        assert!(logs_contain("replica write failed"));
    }

    #[tokio::test]
    async fn every_node_down_is_total_failure() {
        let (store, transport) = fixture(3);
        for node in store.ring().nodes() {
            transport.set_reachable(&node.id, false);
        }
        let err = store
            .store(&ObjectKey::from("k"), Bytes::new())
            .await
            .expect_err("全部不可达");
        assert!(matches!(err, StoreError::TotalFailure { ref failed } if failed.len() == 3));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn read_only_node_rejects_writes() {
        let (store, transport) = fixture(3);
        let key = ObjectKey::from("ro");
        let primary = store.placement(&key)[0].id.clone();
        transport.set_read_only(&primary, true);
        let err = store.store(&key, Bytes::new()).await.expect_err("主节点只读");
        let StoreError::PartialReplication { failed, .. } = err else {
            panic!("应为部分复制");
        };
        assert!(matches!(failed[0].error, NodeIoError::Rejected { .. }));
    }

    #[tokio::test]
    async fn absent_everywhere_is_not_found() {
        let (store, _) = fixture(5);
        let err = store
            .retrieve_within(&ObjectKey::from("ghost"), Duration::from_secs(1))
            .await
            .expect_err("对象不存在");
        assert_eq!(
            err,
            RetrieveError::NotFound {
                key: ObjectKey::from("ghost"),
            }
        );
    }

    #[tokio::test]
    async fn absent_plus_unreachable_is_unavailable() {
        let (store, transport) = fixture(5);
        let key = ObjectKey::from("ghost");
        transport.set_reachable(&store.placement(&key)[2].id, false);
        let err = store
            .retrieve_within(&key, Duration::from_secs(1))
            .await
            .expect_err("对象不存在且有节点不可达");
        assert!(matches!(err, RetrieveError::Unavailable { ref failed } if failed[0].rank == 2));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_ring_is_reported() {
        let ring = Arc::new(HashRing::new(3, 8));
        let store = ReplicatedStore::new(ring, Arc::new(MemoryTransport::new()));
        assert_eq!(
            store.store(&ObjectKey::from("k"), Bytes::new()).await,
            Err(StoreError::EmptyRing)
        );
        assert_eq!(
            store
                .retrieve_within(&ObjectKey::from("k"), Duration::from_secs(1))
                .await,
            Err(RetrieveError::EmptyRing)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_whole_fallback_loop() {
        let (store, transport) = fixture(5);
        let key = ObjectKey::from("slow");
        store
            .store(&key, Bytes::from_static(b"v"))
            .await
            .expect("写入成功");
        let primary = store.placement(&key)[0].id.clone();
        transport.set_latency(&primary, Duration::from_secs(5));

        let err = store
            .retrieve_within(&key, Duration::from_millis(50))
            .await
            .expect_err("主节点过慢");
        assert_eq!(err, RetrieveError::DeadlineExceeded { attempted: 1 });
    }

    #[tokio::test]
    async fn elapsed_deadline_attempts_nothing() {
        let (store, transport) = fixture(3);
        let err = store
            .retrieve(&ObjectKey::from("k"), Instant::now() - Duration::from_millis(1))
            .await
            .expect_err("截止时间已过");
        assert_eq!(err, RetrieveError::DeadlineExceeded { attempted: 0 });
        assert!(transport.calls().is_empty());
    }
}
