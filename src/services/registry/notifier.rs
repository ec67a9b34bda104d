use std::sync::Arc;

use super::listeners::ListenerRegistry;
use super::stats::StatsCounters;
use super::store::RegistryStore;
use super::types::{InstanceRecord, ServiceIdentity};

/// 后端回调引擎的入口
///
/// 可廉价克隆，后端持有它不会与引擎形成循环引用。
#[derive(Debug, Clone)]
pub struct RegistryNotifier {
    pub(crate) store: Arc<RegistryStore>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) stats: Arc<StatsCounters>,
}

impl RegistryNotifier {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RegistryStore::new()),
            listeners: Arc::new(ListenerRegistry::new()),
            stats: Arc::new(StatsCounters::default()),
        }
    }

    // 通知新的全量服务, 总是携带版本号
    pub fn apply_full_snapshot(
        &self,
        identity: &ServiceIdentity,
        instances: Vec<InstanceRecord>,
        version: u64,
    ) -> bool {
        let Some(snapshot) = self.store.replace(identity, instances, version) else {
            StatsCounters::incr(&self.stats.snapshots_stale);
            tracing::debug!(
                service = %identity,
                version = version,
                "Dropped stale snapshot"
            );
            return false;
        };

        StatsCounters::incr(&self.stats.snapshots_accepted);
        tracing::debug!(
            service = %identity,
            version = version,
            instances = snapshot.len(),
            "Accepted snapshot"
        );

        self.fan_out(identity, &snapshot);
        true
    }

    // 通知新增/删除服务
    pub fn apply_delta(&self, identity: &ServiceIdentity, instance: InstanceRecord, add: bool) -> bool {
        let address = instance.address.clone();
        let Some(snapshot) = self.store.apply_delta(identity, instance, add) else {
            tracing::debug!(
                service = %identity,
                address = %address,
                "Ignored removal for unknown service"
            );
            return false;
        };

        StatsCounters::incr(&self.stats.deltas_applied);
        tracing::debug!(
            service = %identity,
            address = %address,
            add = add,
            instances = snapshot.len(),
            "Applied delta"
        );

        self.fan_out(identity, &snapshot);
        true
    }

    pub fn lookup(&self, identity: &ServiceIdentity) -> Vec<InstanceRecord> {
        self.store.lookup(identity)
    }

    /// 当前已接受的版本号，未知服务返回 `None`
    pub fn version(&self, identity: &ServiceIdentity) -> Option<u64> {
        self.store.version(identity)
    }

    pub fn identities(&self) -> Vec<ServiceIdentity> {
        self.store.identities()
    }

    fn fan_out(&self, identity: &ServiceIdentity, snapshot: &[InstanceRecord]) {
        let delivered = self.listeners.fire(identity, snapshot);
        StatsCounters::add(&self.stats.listener_deliveries, delivered);
    }
}

impl Default for RegistryNotifier {
    fn default() -> Self {
        Self::new()
    }
}
