use dashmap::DashMap;

use super::types::{InstanceRecord, ServiceIdentity, SharedNotifyListener};

/// 服务标识 -> 订阅回调列表
///
/// 回调按注册顺序触发。触发前复制一份回调列表，通知过程中新增订阅不会阻塞，
/// 也不会出现在本轮通知里。
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<ServiceIdentity, Vec<SharedNotifyListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, identity: &ServiceIdentity, listener: SharedNotifyListener) {
        self.listeners
            .entry(identity.clone())
            .or_default()
            .push(listener);
    }

    /// 依次通知所有订阅者，返回被通知的数量。回调中的 panic 不做隔离。
    pub fn fire(&self, identity: &ServiceIdentity, instances: &[InstanceRecord]) -> usize {
        let listeners = match self.listeners.get(identity) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        for listener in &listeners {
            listener.notify(instances);
        }

        listeners.len()
    }

    pub fn count(&self, identity: &ServiceIdentity) -> usize {
        self.listeners
            .get(identity)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("identities", &self.listeners.len())
            .finish()
    }
}
