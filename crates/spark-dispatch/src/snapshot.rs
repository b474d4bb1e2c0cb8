//! 持久化快照：精确路由表与活跃端口分配。
//!
//! - **格式 (What)**：
//!   ```json
//!   { "routes": [{ "prefix": 4660, "endpoint": "EndpointA", "priority": 10 }],
//!     "allocations": [{ "port": 2000, "owner": "svc", "zone": "operational", "timestamp": 1700000000000 }] }
//!   ```
//!   健康状态与最近一次测量属于运行期观测，不写入快照；
//! - **写入 (How)**：先写同目录临时文件再 `rename`，读者只会看到旧文件或完整的新文件。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spark_dispatch_core::{
    Endpoint, OwnerId, Port, PortAllocation, RouteEntry, RouteKey, ZoneName,
};

use crate::error::SnapshotError;

/// 一条精确路由。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub prefix: RouteKey,
    pub endpoint: Endpoint,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneName>,
}

impl RouteRecord {
    pub fn from_entry(prefix: RouteKey, entry: &RouteEntry) -> Self {
        Self {
            prefix,
            endpoint: entry.endpoint().clone(),
            priority: entry.priority(),
            zone: entry.zone().cloned(),
        }
    }

    pub fn to_entry(&self) -> RouteEntry {
        let entry = RouteEntry::new(self.endpoint.clone(), self.priority);
        match &self.zone {
            Some(zone) => entry.with_zone(zone.clone()),
            None => entry,
        }
    }
}

/// 一条端口分配。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub port: Port,
    pub owner: OwnerId,
    pub zone: ZoneName,
    /// 分配时刻（Unix 毫秒）。
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl From<&PortAllocation> for AllocationRecord {
    fn from(allocation: &PortAllocation) -> Self {
        Self {
            port: allocation.port,
            owner: allocation.owner.clone(),
            zone: allocation.zone.clone(),
            timestamp: allocation.allocated_at_ms,
            ttl_ms: allocation
                .ttl
                .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl From<AllocationRecord> for PortAllocation {
    fn from(record: AllocationRecord) -> Self {
        Self {
            port: record.port,
            owner: record.owner,
            zone: record.zone,
            allocated_at_ms: record.timestamp,
            ttl: record.ttl_ms.map(Duration::from_millis),
        }
    }
}

/// 快照文档。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub routes: Vec<RouteRecord>,
    #[serde(default)]
    pub allocations: Vec<AllocationRecord>,
}

impl Snapshot {
    /// 从文件读取快照。
    pub fn read(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 原子地写入快照文件。
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(self)?;
        let staging = staging_path(path);
        fs::write(&staging, bytes).map_err(|source| SnapshotError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
