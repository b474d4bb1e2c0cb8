//! 确定性与排他性的性质测试。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：路由层的价值在于“同一输入永远得到同一结果”，以及“同一端口不会同时有两个持有者”；
//!   这两条性质与具体数值无关，适合用 Proptest 在随机拓扑与随机调用序列上验证。
//! - **结构说明 (How)**：
//!   - `prop_placement_is_pure_and_distinct`：两个以相同节点集合独立构造的环，对任意键给出相同落点，
//!     且落点内无重复物理节点、长度为 `min(R, N)`；
//!   - `prop_allocations_never_overlap`：随机交错的分配/释放序列下，活跃端口集合内无重复，且与影子模型一致；
//!   - `prop_allocation_sequence_is_reproducible`：两个独立分配器重放同一序列得到逐项相同的结果。
//! - **合同与边界 (What)**：区间刻意取小（最多 16 个端口），确保耗尽与回绕路径都被频繁覆盖。

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;
use spark_dispatch_core::{
    AllocError, HashRing, Node, OwnerId, Port, PortAllocator, PortRange, ZoneName,
};

#[derive(Clone, Debug)]
enum Step {
    Allocate(u8),
    Release(u8),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0_u8..24).prop_map(Step::Allocate),
            2 => (0_u8..24).prop_map(Step::Release),
        ],
        1..96,
    )
}

fn nodes(count: usize, weights: &[u32]) -> Vec<Node> {
    (0..count)
        .map(|i| {
            Node::new(
                format!("node-{i}"),
                format!("10.1.0.{i}:9000"),
                weights[i % weights.len()],
            )
        })
        .collect()
}

/// 按步骤驱动分配器，返回每一步的可观察结果。
fn replay(allocator: &PortAllocator, steps: &[Step]) -> Vec<Result<Option<Port>, AllocError>> {
    let zone = ZoneName::from("operational");
    steps
        .iter()
        .map(|step| match step {
            Step::Allocate(owner) => allocator
                .allocate(&OwnerId::from(format!("owner-{owner}")), &zone)
                .map(Some),
            Step::Release(offset) => {
                let port = allocator.range().min() + Port::from(*offset % 16);
                Ok(allocator.release(port).map(|allocation| allocation.port))
            }
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_placement_is_pure_and_distinct(
        count in 1_usize..8,
        replication in 1_usize..5,
        weights in prop::collection::vec(1_u32..4, 1..4),
        key in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let left = HashRing::with_nodes(replication, 8, nodes(count, &weights)).expect("拓扑合法");
        let right = HashRing::with_nodes(replication, 8, nodes(count, &weights)).expect("拓扑合法");

        let placement = left.place(&key);
        prop_assert_eq!(&placement, &right.place(&key));
        prop_assert_eq!(placement.len(), replication.min(count));

        let distinct: HashSet<_> = placement.iter().copied().collect();
        prop_assert_eq!(distinct.len(), placement.len());
    }

    #[test]
    fn prop_allocations_never_overlap(width in 1_u16..16, steps in steps()) {
        let range = PortRange::new(5_000, 5_000 + width - 1).expect("区间合法");
        let allocator = PortAllocator::new(range);
        let mut model: BTreeMap<Port, ()> = BTreeMap::new();

        for (step, outcome) in steps.iter().zip(replay(&allocator, &steps)) {
            match (step, outcome) {
                (Step::Allocate(_), Ok(Some(port))) => {
                    prop_assert!(range.contains(port));
                    // 同名所有者可重复分配，但端口本身不能被两条活跃记录占用。
                    prop_assert!(model.insert(port, ()).is_none(), "端口 {} 被重复认领", port);
                }
                (Step::Allocate(_), Err(AllocError::Exhausted { .. })) => {
                    prop_assert_eq!(model.len(), usize::from(width));
                }
                (Step::Release(_), Ok(released)) => {
                    if let Some(port) = released {
                        prop_assert!(model.remove(&port).is_some());
                    }
                }
                (step, outcome) => prop_assert!(false, "意外结果 {:?} -> {:?}", step, outcome),
            }
        }

        let active: Vec<Port> = allocator.allocations().iter().map(|a| a.port).collect();
        let expected: Vec<Port> = model.keys().copied().collect();
        prop_assert_eq!(active, expected);
    }

    #[test]
    fn prop_allocation_sequence_is_reproducible(width in 1_u16..16, steps in steps()) {
        let range = PortRange::new(7_000, 7_000 + width - 1).expect("区间合法");
        let first = replay(&PortAllocator::new(range), &steps);
        let second = replay(&PortAllocator::new(range), &steps);
        prop_assert_eq!(first, second);
    }
}
