//! # spark-dispatch
//!
//! ## 定位（Why）
//! - 确定性路由层的门面：[`RoutingLayer`] 组合路由解析、一致性哈希放置、复制存取、
//!   端口分配与延迟分区遥测；
//! - 同步核心来自 `spark-dispatch-core`，异步存储来自 `spark-dispatch-store`，本 crate 只负责组装、
//!   计时、快照与日志安装。
//!
//! ## 快速上手（How）
//! ```no_run
//! use std::sync::Arc;
//!
//! use spark_dispatch::{RoutingLayer, telemetry};
//! use spark_dispatch_core::{DispatchConfig, RouteEntry, RouteKey};
//! use spark_dispatch_store::MemoryTransport;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! telemetry::install()?;
//! let config = DispatchConfig::from_path("dispatch.toml")?;
//! let layer = RoutingLayer::new(&config, Arc::new(MemoryTransport::new()))?;
//! layer.update_route(RouteKey::new(0x1234), RouteEntry::new("EndpointA", 10));
//! let resolution = layer.resolve(RouteKey::new(0x1234))?;
//! assert_eq!(resolution.entry().endpoint().as_str(), "EndpointA");
//! layer.checkpoint("dispatch-state.json")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod layer;
pub mod snapshot;
pub mod telemetry;

pub use error::{DispatchError, SnapshotError};
pub use layer::{Dispatched, OpenedEndpoint, RoutingLayer};
pub use snapshot::{AllocationRecord, RouteRecord, Snapshot};
pub use telemetry::{TelemetryError, TelemetryReport};
