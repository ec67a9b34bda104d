use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::services::registry::{InstanceRecord, RegistryError, ServiceIdentity};

/// 订阅流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// 每个服务的广播通道容量
    pub channel_capacity: usize,
    /// 建立订阅流时是否先推送一次当前数据
    pub emit_initial: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            emit_initial: true,
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // broadcast 通道容量必须大于 0
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "watch channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 某个服务的一次完整实例列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub identity: ServiceIdentity,
    pub instances: Vec<InstanceRecord>,
}

/// 订阅流错误类型
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Watch stream lagged behind, skipped {skipped} snapshots")]
    Lagged { skipped: u64 },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
