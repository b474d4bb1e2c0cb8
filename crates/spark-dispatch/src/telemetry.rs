//! 进程级日志订阅器安装与遥测读数。
//!
//! - `install`：组装 `EnvFilter + fmt` 并设为全局 Subscriber，只允许成功一次；
//! - [`TelemetryReport`]：门面对外暴露的一致性读数，可直接序列化为 JSON 交给编排器。

use std::sync::OnceLock;

use serde::Serialize;
use spark_dispatch_core::{ResolverStats, ZoneTally};
use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装失败原因。
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("spark-dispatch telemetry is already installed")]
    AlreadyInstalled,

    /// 其他组件已设置全局 Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,

    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 以默认过滤级别 `info` 安装全局日志订阅器；`RUST_LOG` 存在时以其为准。
pub fn install() -> Result<(), TelemetryError> {
    install_with_default_filter("info")
}

/// 指定 `RUST_LOG` 缺失时使用的过滤指令。
pub fn install_with_default_filter(default_directives: &str) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = Registry::default()
        .with(build_env_filter(default_directives))
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    // 并发安装时只有一个调用能走到这里：set_global_default 本身只会成功一次。
    let _ = INSTALLED.set(());
    Ok(())
}

fn build_env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// 门面遥测读数。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryReport {
    /// 端口区间利用率（0.0–1.0）。
    pub utilization: f64,
    /// 分配器自启动以来的耗尽次数。
    pub exhaustions: u64,
    pub zones: Vec<ZoneTally>,
    pub resolver: ResolverStats,
    pub ring_nodes: usize,
}
