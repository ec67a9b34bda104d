use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 注册队列的默认容量
pub const DEFAULT_QUEUE_CAPACITY: usize = 1204;

/// 环境变量覆盖的前缀，例如 `REGISTRY_QUEUE_CAPACITY`
pub const ENV_PREFIX: &str = "REGISTRY_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// 注册队列容量，队列满时 register 立即失败
    pub queue_capacity: usize,
    pub retry: RetryConfig,
}

/// 注册失败后的重试退避
///
/// 重试次数不设上限，每次失败后的等待时间按倍数递增，直到 `max_backoff_ms`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// 环境变量覆盖项，全部可选
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    queue_capacity: Option<usize>,
    retry_initial_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
    retry_multiplier: Option<f64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RegistryConfig {
    /// 读取 TOML 配置文件，再应用 `.env` 与环境变量覆盖
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&config_str)?;

        dotenvy::dotenv().ok();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(config_str)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let overrides = envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?;
        self.merge(overrides);
        Ok(())
    }

    fn merge(&mut self, overrides: EnvOverrides) {
        if let Some(capacity) = overrides.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(initial) = overrides.retry_initial_backoff_ms {
            self.retry.initial_backoff_ms = initial;
        }
        if let Some(max) = overrides.retry_max_backoff_ms {
            self.retry.max_backoff_ms = max;
        }
        if let Some(multiplier) = overrides.retry_multiplier {
            self.retry.multiplier = multiplier;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_backoff_ms ({}) is smaller than retry.initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// 连续第 `consecutive_failures` 次失败后的等待时长
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = consecutive_failures.saturating_sub(1).min(63) as i32;
        let delay_ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}
