//! 日志订阅器引导。
//!
//! 数据面只使用 `tracing` 宏产生事件，订阅器由进程入口调用 [`install_tracing`] 一次性安装：
//! `registry + EnvFilter + fmt`。过滤规则读取 `RUST_LOG`，缺省为 `info`。

use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装阶段可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("tracing 订阅器已由本模块安装，禁止重复调用")]
    AlreadyInstalled,
    #[error("全局 tracing 订阅器已由外部设置，无法覆盖")]
    SubscriberAlreadySet,
    #[error("设置全局 tracing 订阅器失败: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 以 `RUST_LOG`（缺省 `info`）安装全局订阅器。
///
/// # 契约说明（What）
/// - 多次调用返回 [`InstallError::AlreadyInstalled`]；
/// - 外部已设置订阅器时返回 [`InstallError::SubscriberAlreadySet`]，不做覆盖。
pub fn install_tracing() -> Result<(), InstallError> {
    install_with_filter(build_env_filter())
}

/// 使用显式过滤指令安装，便于配置文件覆盖环境变量。
pub fn install_tracing_with(directives: &str) -> Result<(), InstallError> {
    install_with_filter(EnvFilter::new(directives))
}

fn install_with_filter(filter: EnvFilter) -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        let first = install_tracing_with("warn");
        assert!(first.is_ok() || matches!(first, Err(InstallError::SubscriberAlreadySet)));
        assert!(install_tracing().is_err());
    }
}
