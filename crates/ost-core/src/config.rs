//! 存储目标配置。
//!
//! 配置以 TOML 表达，所有字段都有缺省值，因此空文档即可得到可运行的配置：
//!
//! ```toml
//! [pool]
//! bundles = 8
//! buffer_size = 1048576
//! backoff_initial_ms = 1
//! backoff_cap_ms = 128
//! wait_budget_ms = 2048
//!
//! [bulk]
//! timeout_secs = 100
//! checksum = false
//!
//! [service]
//! workers = 4
//! queue_depth = 256
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, codes};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置解析失败: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("配置项 `{field}` 非法: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::new(codes::CONFIG_INVALID, err.to_string()).with_cause(err)
    }
}

/// 缓冲池参数。退避从 `backoff_initial_ms` 开始逐次翻倍，不超过 `backoff_cap_ms`，
/// 累计等待超过 `wait_budget_ms` 即判定超时。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub bundles: usize,
    pub buffer_size: usize,
    pub backoff_initial_ms: u64,
    pub backoff_cap_ms: u64,
    pub wait_budget_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            bundles: 8,
            buffer_size: 1 << 20,
            backoff_initial_ms: 1,
            backoff_cap_ms: 128,
            wait_budget_ms: 2048,
        }
    }
}

impl PoolConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.wait_budget_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkConfig {
    /// 批量传输等待完成的期限。
    pub timeout_secs: u64,
    /// 读路径是否计算并回填校验和。写路径只要客户端提供就会校验。
    pub checksum: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 100,
            checksum: false,
        }
    }
}

impl BulkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    pub pool: PoolConfig,
    pub bulk: BulkConfig,
    pub service: ServiceConfig,
}

impl TargetConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: TargetConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &'static str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        };
        if self.pool.bundles == 0 {
            return invalid("pool.bundles", "must be at least 1");
        }
        if self.pool.buffer_size == 0 {
            return invalid("pool.buffer_size", "must be at least 1 byte");
        }
        if self.pool.backoff_initial_ms == 0 {
            return invalid("pool.backoff_initial_ms", "must be at least 1");
        }
        if self.pool.backoff_cap_ms < self.pool.backoff_initial_ms {
            return invalid("pool.backoff_cap_ms", "must not be below backoff_initial_ms");
        }
        if self.bulk.timeout_secs == 0 {
            return invalid("bulk.timeout_secs", "must be at least 1");
        }
        if self.service.workers == 0 {
            return invalid("service.workers", "must be at least 1");
        }
        if self.service.queue_depth == 0 {
            return invalid("service.queue_depth", "must be at least 1");
        }
        Ok(())
    }
}
