use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::backend::RegistryBackend;
use super::notifier::RegistryNotifier;
use super::types::{
    Address, BackendError, InstanceRecord, ServiceIdentity, SharedOfflineListener,
    VersionedInstanceSet,
};

/// 后端钩子调用计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCallStats {
    pub register_calls: usize,
    pub register_successes: usize,
    pub unregister_calls: usize,
    pub subscribe_calls: usize,
    pub destroy_calls: usize,
}

/// 进程内的注册后端
///
/// 服务名 -> 带版本号的实例集合。每次变更版本号加一，
/// 已被订阅的服务通过全量通知回调引擎，回调在独立任务中送达。支持注入失败，便于测试重试逻辑。
pub struct InMemoryBackend {
    notifier: RegistryNotifier,
    entries: DashMap<ServiceIdentity, VersionedInstanceSet>,
    watched: DashSet<ServiceIdentity>,
    offline_listeners: DashMap<Address, Vec<SharedOfflineListener>>,
    next_version: AtomicU64,
    pending_register_failures: AtomicUsize,
    fail_unregister: AtomicBool,
    fail_destroy: AtomicBool,
    register_calls: AtomicUsize,
    register_successes: AtomicUsize,
    unregister_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(notifier: RegistryNotifier) -> Self {
        Self {
            notifier,
            entries: DashMap::new(),
            watched: DashSet::new(),
            offline_listeners: DashMap::new(),
            next_version: AtomicU64::new(1),
            pending_register_failures: AtomicUsize::new(0),
            fail_unregister: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
            register_calls: AtomicUsize::new(0),
            register_successes: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    /// 接下来的 `n` 次 do_register 返回 `Unavailable`
    pub fn fail_next_registers(&self, n: usize) {
        self.pending_register_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    pub fn call_stats(&self) -> BackendCallStats {
        BackendCallStats {
            register_calls: self.register_calls.load(Ordering::SeqCst),
            register_successes: self.register_successes.load(Ordering::SeqCst),
            unregister_calls: self.unregister_calls.load(Ordering::SeqCst),
            subscribe_calls: self.subscribe_calls.load(Ordering::SeqCst),
            destroy_calls: self.destroy_calls.load(Ordering::SeqCst),
        }
    }

    /// 后端当前保存的实例 (不经过引擎)
    pub fn stored_instances(&self, identity: &ServiceIdentity) -> Vec<InstanceRecord> {
        self.entries
            .get(identity)
            .map(|entry| entry.instances.clone())
            .unwrap_or_default()
    }

    /// 后端保存的服务数量，包括实例已清空的服务
    pub fn service_count(&self) -> usize {
        self.entries.len()
    }

    fn take_register_failure(&self) -> bool {
        self.pending_register_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    // 在 map 的锁内修改，锁外推送。`create` 为 false 时不为未知服务建条目
    fn mutate<F>(&self, identity: &ServiceIdentity, create: bool, f: F)
    where
        F: FnOnce(&mut Vec<InstanceRecord>) -> bool,
    {
        let snapshot = {
            let mut entry = if create {
                self.entries.entry(identity.clone()).or_default()
            } else {
                match self.entries.get_mut(identity) {
                    Some(entry) => entry,
                    None => return,
                }
            };
            if !f(&mut entry.instances) {
                return;
            }
            entry.version = self.next_version.fetch_add(1, Ordering::SeqCst);
            entry.value().clone()
        };

        self.publish(identity, snapshot);
    }

    // 通知在独立任务中执行，监听者的 panic 不会波及调用方 (注册工作任务)。
    // 乱序送达由引擎端的版本号单调规则吸收。
    fn publish(&self, identity: &ServiceIdentity, snapshot: VersionedInstanceSet) {
        if !self.watched.contains(identity) {
            return;
        }

        let notifier = self.notifier.clone();
        let identity = identity.clone();
        let deliver = move || {
            notifier.apply_full_snapshot(&identity, snapshot.instances, snapshot.version);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { deliver() });
            }
            Err(_) => deliver(),
        }
    }
}

#[async_trait]
impl RegistryBackend for InMemoryBackend {
    async fn do_register(&self, instance: &InstanceRecord) -> Result<(), BackendError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_register_failure() {
            return Err(BackendError::Unavailable(format!(
                "injected failure registering {instance}"
            )));
        }

        self.mutate(&instance.identity, true, |instances| {
            match instances.iter_mut().find(|existing| **existing == *instance) {
                Some(existing) => existing.meta = instance.meta.clone(),
                None => instances.push(instance.clone()),
            }
            true
        });

        self.register_successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn do_unregister(&self, instance: &InstanceRecord) -> Result<(), BackendError> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!(
                "injected failure unregistering {instance}"
            )));
        }

        self.mutate(&instance.identity, false, |instances| {
            let before = instances.len();
            instances.retain(|existing| existing != instance);
            instances.len() != before
        });
        Ok(())
    }

    async fn do_subscribe(&self, identity: &ServiceIdentity) -> Result<(), BackendError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        // 同一服务只建立一次监听，首次监听时推送当前数据
        if !self.watched.insert(identity.clone()) {
            return Ok(());
        }

        let current = self.entries.get(identity).map(|entry| entry.value().clone());
        if let Some(snapshot) = current {
            self.publish(identity, snapshot);
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(BackendError::Internal("injected destroy failure".to_string()));
        }

        self.watched.clear();
        self.offline_listeners.clear();
        Ok(())
    }

    fn offline(&self, address: &Address) {
        let identities: Vec<ServiceIdentity> =
            self.entries.iter().map(|entry| entry.key().clone()).collect();
        for identity in identities {
            self.mutate(&identity, false, |instances| {
                let before = instances.len();
                instances.retain(|existing| existing.address != *address);
                instances.len() != before
            });
        }

        if let Some((_, listeners)) = self.offline_listeners.remove(address) {
            tracing::info!(
                address = %address,
                listeners = listeners.len(),
                "Notifying offline listeners"
            );
            for listener in listeners {
                listener.offline();
            }
        }
    }

    fn offline_listening(&self, address: &Address, listener: SharedOfflineListener) {
        self.offline_listeners
            .entry(address.clone())
            .or_default()
            .push(listener);
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("services", &self.entries.len())
            .field("watched", &self.watched.len())
            .field("calls", &self.call_stats())
            .finish()
    }
}
