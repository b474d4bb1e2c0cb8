//! 标识符契约：路由层内部流转的字符串型标识统一收敛为新类型。
//!
//! # 设计动机（Why）
//! - 端点、所有者、节点与延迟分区四类标识均以字符串表达，若直接使用 `String` 容易在
//!   函数签名中互相混用；
//! - 统一以 `Arc<str>` 承载，克隆只增加引用计数，适合在并发映射与快照之间频繁复制。
//!
//! # 集成方式（How）
//! - 通过 `From<&str>` / `From<String>` 构造；
//! - 序列化时表现为普通字符串（`#[serde(transparent)]`），与快照格式保持一致。

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

macro_rules! arc_str_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// 以任意字符串构造标识。
            pub fn new(value: impl Into<Arc<str>>) -> Self {
                Self(value.into())
            }

            /// 返回底层字符串切片。
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(Arc::from(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }
    };
}

arc_str_id! {
    /// 路由目标端点引用。
    ///
    /// - **契约 (What)**：内容对本层不透明，可能是 `host:port`、服务名或外部传输层可识别的任意句柄；
    /// - **边界**：路由层只负责返回该引用，真正的发送由外部传输层完成。
    Endpoint
}

arc_str_id! {
    /// 端口分配与预留的持有者标识。
    OwnerId
}

arc_str_id! {
    /// 哈希环中物理节点的稳定标识，参与虚拟节点哈希，变更会改变数据落点。
    NodeId
}

arc_str_id! {
    /// 延迟分区（Bernoulli Zone）名称，例如 `tactical`。
    ///
    /// - **意图 (Why)**：分区名称是分类器上限表的主键，同时作为端口分配记录的标签；
    /// - **契约 (What)**：实现 `Borrow<str>`，可直接以 `&str` 查询有序映射。
    ZoneName
}
