use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// 逻辑服务标识 (分组 + 名称 + 版本)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl ServiceIdentity {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.group, self.name, self.version)
    }
}

// 网络地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 服务提供者附带的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMeta {
    /// 负载均衡权重
    pub weight: u32,
    /// 建议的连接数
    pub conn_count: u32,
}

impl Default for ProviderMeta {
    fn default() -> Self {
        Self {
            weight: 50,
            conn_count: 1,
        }
    }
}

/// 一条具体的服务注册信息
///
/// 相等性只看 (服务标识, 地址)，元数据不同的两条记录仍视为同一个实例。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub identity: ServiceIdentity,
    pub address: Address,
    #[serde(default)]
    pub meta: ProviderMeta,
}

impl InstanceRecord {
    pub fn new(identity: ServiceIdentity, address: Address) -> Self {
        Self {
            identity,
            address,
            meta: ProviderMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: ProviderMeta) -> Self {
        self.meta = meta;
        self
    }
}

impl PartialEq for InstanceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.address == other.address
    }
}

impl Eq for InstanceRecord {}

impl Hash for InstanceRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Display for InstanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.address)
    }
}

/// 某个服务标识下带版本号的实例列表
#[derive(Debug, Clone, Default)]
pub struct VersionedInstanceSet {
    pub version: u64,
    pub instances: Vec<InstanceRecord>,
}

/// 服务实例列表变更通知
pub trait NotifyListener: Send + Sync {
    fn notify(&self, instances: &[InstanceRecord]);
}

impl<F> NotifyListener for F
where
    F: Fn(&[InstanceRecord]) + Send + Sync,
{
    fn notify(&self, instances: &[InstanceRecord]) {
        self(instances)
    }
}

/// 对端地址下线通知
pub trait OfflineListener: Send + Sync {
    fn offline(&self);
}

impl<F> OfflineListener for F
where
    F: Fn() + Send + Sync,
{
    fn offline(&self) {
        self()
    }
}

pub type SharedNotifyListener = Arc<dyn NotifyListener>;
pub type SharedOfflineListener = Arc<dyn OfflineListener>;

/// 后端存储调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Backend internal error: {0}")]
    Internal(String),
}

/// 注册中心错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registration queue is full (capacity: {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("Registry engine has been shut down")]
    ShutDown,

    #[error("Backend failure: {0}")]
    Backend(#[from] BackendError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_instance_equality_ignores_meta() {
        let id = ServiceIdentity::new("test", "Echo", "1.0.0");
        let a = InstanceRecord::new(id.clone(), Address::new("10.0.0.1", 8080));
        let b = InstanceRecord::new(id, Address::new("10.0.0.1", 8080)).with_meta(ProviderMeta {
            weight: 99,
            conn_count: 4,
        });

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_display_formats() {
        let id = ServiceIdentity::new("test", "Echo", "1.0.0");
        let record = InstanceRecord::new(id.clone(), Address::new("127.0.0.1", 18090));

        assert_eq!(id.to_string(), "test/Echo:1.0.0");
        assert_eq!(record.to_string(), "test/Echo:1.0.0@127.0.0.1:18090");
    }
}
