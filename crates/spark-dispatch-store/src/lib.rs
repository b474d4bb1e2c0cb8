//! # spark-dispatch-store
//!
//! ## 定位（Why）
//! - 在一致性哈希环之上提供复制内容存储：写入主节点与副本，读取时按环序确定性回退；
//! - 节点 I/O 通过 [`NodeTransport`] 抽象注入，本 crate 自带内存实现 [`MemoryTransport`]。
//!
//! ## 契约（What）
//! - 不持有任何跨 `.await` 的锁；落点在第一次 I/O 之前已经从环快照中完整解析；
//! - 截止时间约束整次读取，而不是单个节点的调用。

pub mod error;
pub mod memory;
pub mod store;
pub mod transport;

pub use error::{NodeIoError, ReplicaFailure, RetrieveError, StoreError};
pub use memory::{MemoryTransport, TransportCall, TransportOp};
pub use store::{ReplicatedStore, StoreReceipt};
pub use transport::{NodeTransport, ObjectKey};
