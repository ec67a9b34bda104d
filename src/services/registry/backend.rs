use async_trait::async_trait;

use super::types::{Address, BackendError, InstanceRecord, ServiceIdentity, SharedOfflineListener};

/// 后端存储钩子 (例如协调服务集群)
///
/// 引擎只通过这些单次调用与外部存储交互。后端观察到变更后，
/// 通过 [`RegistryNotifier`](super::RegistryNotifier) 回调引擎。
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// 持久化注册一个实例，失败时由注册工作线程重试
    async fn do_register(&self, instance: &InstanceRecord) -> Result<(), BackendError>;

    /// 持久化注销一个实例，同步调用，不重试
    async fn do_unregister(&self, instance: &InstanceRecord) -> Result<(), BackendError>;

    /// 建立对某个服务的监听，每次订阅都会调用一次，幂等性由实现方负责
    async fn do_subscribe(&self, identity: &ServiceIdentity) -> Result<(), BackendError>;

    /// 关闭时释放后端资源
    async fn destroy(&self) -> Result<(), BackendError>;

    // 对应地址的机器下线, 实现方根据需要覆盖
    fn offline(&self, _address: &Address) {}

    // 监听对应地址的下线事件, 实现方根据需要覆盖
    fn offline_listening(&self, _address: &Address, _listener: SharedOfflineListener) {}
}
