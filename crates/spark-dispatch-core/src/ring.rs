//! # HashRing：带虚拟节点的一致性哈希环
//!
//! ## 核心意图（Why）
//! - 把任意不透明键映射为有序的节点下标列表（主节点 + 副本），供复制存储决定落点；
//! - 虚拟节点按权重成比例分布，平滑不同容量节点之间的负载。
//!
//! ## 行为契约（What）
//! - `place`：对键做 SHA-256 取前 8 字节得到环上位置，顺时针遍历并跳过已选中的物理节点，
//!   直到收集到 `R` 个节点或节点耗尽（节点数少于 `R` 时返回的列表被截断，而不是报错）；
//! - 同一拓扑下 `place` 纯函数、可重复；
//! - 拓扑变更（增删节点、整体替换）构建新的 [`RingSnapshot`] 并以一次指针交换发布，
//!   进行中的 `place` 只会看到旧拓扑或新拓扑之一。
//!
//! ## 实现策略（How）
//! - 快照由 `ArcSwap` 承载，读路径零锁；
//! - 管理操作之间以 `parking_lot::Mutex` 串行化“读取-重建-发布”，避免并发变更互相覆盖。

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::TopologyError;
use crate::ids::{Endpoint, NodeId};

/// 节点在当前快照中的下标。
pub type NodeIndex = usize;

/// 单个物理节点允许展开的虚拟节点上限（`vnodes_per_weight * weight`）。
pub const MAX_VNODES_PER_NODE: u64 = 1 << 16;

/// 哈希环中的物理节点。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub endpoint: Endpoint,
    /// 相对容量权重，虚拟节点数 = `vnodes_per_weight * weight`。
    pub weight: u32,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, endpoint: impl Into<Endpoint>, weight: u32) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            weight,
        }
    }
}

/// 将任意字节映射到环上的 64 位位置。
pub fn ring_position(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// 不可变的环拓扑快照。
///
/// - **契约 (What)**：`points` 按（位置, 节点下标）升序排列；下标仅在同一快照内有效，
///   调用方若需要同时解析节点信息，应持有同一个快照完成 `place` 与 `node`。
#[derive(Clone, Debug)]
pub struct RingSnapshot {
    nodes: Vec<Node>,
    points: Vec<(u64, NodeIndex)>,
    replication: usize,
}

impl RingSnapshot {
    fn build(nodes: Vec<Node>, vnodes_per_weight: u32, replication: usize) -> Self {
        let mut points = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            // 入环前已按 MAX_VNODES_PER_NODE 校验，乘积不会溢出。
            let vnodes = vnodes_per_weight.saturating_mul(node.weight);
            for vnode in 0..vnodes {
                let label = format!("{}#{vnode}", node.id);
                points.push((ring_position(label.as_bytes()), index));
            }
        }
        points.sort_unstable();
        Self {
            nodes,
            points,
            replication,
        }
    }

    /// 计算键的落点：主节点在前，其后按环序排列副本。
    pub fn place(&self, key: &[u8]) -> Vec<NodeIndex> {
        if self.points.is_empty() {
            return Vec::new();
        }
        let wanted = self.replication.min(self.nodes.len());
        let position = ring_position(key);
        let start = self.points.partition_point(|(point, _)| *point < position);

        let mut placement = Vec::with_capacity(wanted);
        for offset in 0..self.points.len() {
            let (_, index) = self.points[(start + offset) % self.points.len()];
            if !placement.contains(&index) {
                placement.push(index);
                if placement.len() == wanted {
                    break;
                }
            }
        }
        placement
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// 环上虚拟节点总数。
    pub fn vnode_count(&self) -> usize {
        self.points.len()
    }

    pub fn replication(&self) -> usize {
        self.replication
    }
}

/// 可热更新的一致性哈希环。
///
/// # 教案式注释
/// - **意图 (Why)**：读多写少，读路径只需 `load` 一次快照；
/// - **契约 (What)**：`replication` 与 `vnodes_per_weight` 在构造后固定；节点权重必须大于 0；
/// - **风险 (Trade-offs)**：每次拓扑变更都重建全部虚拟节点，节点数很大时管理操作会更慢，
///   但不影响并发读取。
#[derive(Debug)]
pub struct HashRing {
    snapshot: ArcSwap<RingSnapshot>,
    admin: Mutex<()>,
    vnodes_per_weight: u32,
    replication: usize,
}

impl HashRing {
    /// 构造空环。`vnodes_per_weight` 与 `replication` 小于 1 时按 1 处理。
    pub fn new(replication: usize, vnodes_per_weight: u32) -> Self {
        let replication = replication.max(1);
        let vnodes_per_weight = vnodes_per_weight.max(1);
        Self {
            snapshot: ArcSwap::from_pointee(RingSnapshot::build(
                Vec::new(),
                vnodes_per_weight,
                replication,
            )),
            admin: Mutex::new(()),
            vnodes_per_weight,
            replication,
        }
    }

    /// 以给定节点集合构造环。
    pub fn with_nodes<I>(
        replication: usize,
        vnodes_per_weight: u32,
        nodes: I,
    ) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = Node>,
    {
        let ring = Self::new(replication, vnodes_per_weight);
        ring.replace_topology(nodes)?;
        Ok(ring)
    }

    /// 当前拓扑快照。
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.snapshot.load_full()
    }

    /// 在当前拓扑下计算落点。
    pub fn place(&self, key: &[u8]) -> Vec<NodeIndex> {
        self.snapshot.load().place(key)
    }

    pub fn replication(&self) -> usize {
        self.replication
    }

    /// 当前节点列表的拷贝。
    pub fn nodes(&self) -> Vec<Node> {
        self.snapshot.load().nodes.clone()
    }

    /// 按当前快照解析节点下标。拓扑可能在两次调用之间变化，需要一致性时请持有 [`Self::snapshot`]。
    pub fn node(&self, index: NodeIndex) -> Option<Node> {
        self.snapshot.load().node(index).cloned()
    }

    /// 管理操作：加入节点。
    pub fn add_node(&self, node: Node) -> Result<(), TopologyError> {
        let _admin = self.admin.lock();
        let current = self.snapshot.load();
        self.check_node(&node)?;
        if current.nodes.iter().any(|existing| existing.id == node.id) {
            return Err(TopologyError::DuplicateNode { id: node.id });
        }
        let mut nodes = current.nodes.clone();
        let id = node.id.clone();
        nodes.push(node);
        self.publish(nodes);
        info!(node = %id, "node joined ring");
        Ok(())
    }

    /// 管理操作：移除节点，返回被移除的节点。
    pub fn remove_node(&self, id: &NodeId) -> Result<Node, TopologyError> {
        let _admin = self.admin.lock();
        let mut nodes = self.snapshot.load().nodes.clone();
        let position = nodes
            .iter()
            .position(|node| &node.id == id)
            .ok_or_else(|| TopologyError::NodeNotFound { id: id.clone() })?;
        let removed = nodes.remove(position);
        self.publish(nodes);
        info!(node = %id, "node left ring");
        Ok(removed)
    }

    /// 管理操作：整体替换拓扑。
    pub fn replace_topology<I>(&self, nodes: I) -> Result<(), TopologyError>
    where
        I: IntoIterator<Item = Node>,
    {
        let _admin = self.admin.lock();
        let mut accepted: Vec<Node> = Vec::new();
        for node in nodes {
            self.check_node(&node)?;
            if accepted.iter().any(|existing| existing.id == node.id) {
                return Err(TopologyError::DuplicateNode { id: node.id });
            }
            accepted.push(node);
        }
        let count = accepted.len();
        self.publish(accepted);
        info!(nodes = count, "ring topology replaced");
        Ok(())
    }

    /// 权重必须为正，且展开后的虚拟节点数不超过 [`MAX_VNODES_PER_NODE`]。
    fn check_node(&self, node: &Node) -> Result<(), TopologyError> {
        if node.weight == 0 {
            return Err(TopologyError::ZeroWeight {
                id: node.id.clone(),
            });
        }
        let vnodes = u64::from(self.vnodes_per_weight) * u64::from(node.weight);
        if vnodes > MAX_VNODES_PER_NODE {
            return Err(TopologyError::TooManyVirtualNodes {
                id: node.id.clone(),
                vnodes,
                max: MAX_VNODES_PER_NODE,
            });
        }
        Ok(())
    }

    fn publish(&self, nodes: Vec<Node>) {
        let snapshot = RingSnapshot::build(nodes, self.vnodes_per_weight, self.replication);
        self.snapshot.store(Arc::new(snapshot));
    }
}
