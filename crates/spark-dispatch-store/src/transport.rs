//! 节点 I/O 抽象。

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use spark_dispatch_core::{Node, RouteKey};

use crate::error::NodeIoError;

/// 对象键：不透明字节串，经哈希环放置。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey(Bytes);

impl ObjectKey {
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for ObjectKey {
    fn from(key: &str) -> Self {
        Self(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<String> for ObjectKey {
    fn from(key: String) -> Self {
        Self(Bytes::from(key))
    }
}

impl From<Vec<u8>> for ObjectKey {
    fn from(key: Vec<u8>) -> Self {
        Self(Bytes::from(key))
    }
}

/// 以路由键的大端字节作为对象键，使内容与路由前缀一一对应。
impl From<RouteKey> for ObjectKey {
    fn from(key: RouteKey) -> Self {
        Self(Bytes::copy_from_slice(&key.get().to_be_bytes()))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// 与单个存储节点交互的异步通道。
///
/// # 教案式说明
/// - **意图 (Why)**：复制存储只决定“写到哪、按什么顺序读”，真正的网络或磁盘 I/O 由实现方提供；
/// - **契约 (What)**：
///   - `put` 覆盖写入，重复写同一对象必须幂等；
///   - `get` 以 `Ok(None)` 表示节点可达但对象不存在，以 `Err` 表示节点本身失败，
///     二者在回退判定中含义不同；
///   - 实现必须 `Send + Sync`，同一实例会被多个任务并发调用；
/// - **风险 (Trade-offs)**：`async_trait` 每次调用装箱一次 Future，换取对象安全的 `Arc<dyn NodeTransport>`。
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// 将对象写入节点。
    async fn put(&self, node: &Node, key: &ObjectKey, payload: Bytes) -> Result<(), NodeIoError>;

    /// 从节点读取对象。
    async fn get(&self, node: &Node, key: &ObjectKey) -> Result<Option<Bytes>, NodeIoError>;
}
