use std::collections::HashMap;

use parking_lot::RwLock;

use super::types::{InstanceRecord, ServiceIdentity, VersionedInstanceSet};

/// 带版本号的服务实例存储
///
/// 整个存储共用一把读写锁：查询并发，写入互斥。锁只覆盖 map 的修改，
/// 写入方拿到的快照在锁外用于通知。
#[derive(Debug, Default)]
pub struct RegistryStore {
    registries: RwLock<HashMap<ServiceIdentity, VersionedInstanceSet>>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全量替换。仅当该服务尚无版本或已接受的版本严格小于 `version` 时生效，
    /// 生效时返回新列表的副本。
    pub fn replace(
        &self,
        identity: &ServiceIdentity,
        instances: Vec<InstanceRecord>,
        version: u64,
    ) -> Option<Vec<InstanceRecord>> {
        let mut registries = self.registries.write();

        if let Some(current) = registries.get(identity) {
            if current.version >= version {
                return None;
            }
        }

        let snapshot = instances.clone();
        registries.insert(
            identity.clone(),
            VersionedInstanceSet { version, instances },
        );
        Some(snapshot)
    }

    /// 增量新增/删除，与版本号无关。
    ///
    /// 不存在的服务上做删除返回 `None`；其余情况返回修改后列表的副本，
    /// 即使删除的实例本来就不在列表中。
    pub fn apply_delta(
        &self,
        identity: &ServiceIdentity,
        instance: InstanceRecord,
        add: bool,
    ) -> Option<Vec<InstanceRecord>> {
        let mut registries = self.registries.write();

        match registries.get_mut(identity) {
            Some(data) => {
                if add {
                    data.instances.push(instance);
                } else {
                    data.instances.retain(|existing| *existing != instance);
                }
                Some(data.instances.clone())
            }
            None if add => {
                let instances = vec![instance];
                registries.insert(
                    identity.clone(),
                    VersionedInstanceSet {
                        version: 0,
                        instances: instances.clone(),
                    },
                );
                Some(instances)
            }
            None => None,
        }
    }

    pub fn lookup(&self, identity: &ServiceIdentity) -> Vec<InstanceRecord> {
        self.registries
            .read()
            .get(identity)
            .map(|data| data.instances.clone())
            .unwrap_or_default()
    }

    pub fn version(&self, identity: &ServiceIdentity) -> Option<u64> {
        self.registries.read().get(identity).map(|data| data.version)
    }

    pub fn identities(&self) -> Vec<ServiceIdentity> {
        self.registries.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::types::Address;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("test", "Echo", "1.0.0")
    }

    fn instance(port: u16) -> InstanceRecord {
        InstanceRecord::new(identity(), Address::new("10.0.0.1", port))
    }

    #[test]
    fn test_replace_rejects_stale_versions() {
        let store = RegistryStore::new();

        assert!(store.replace(&identity(), vec![instance(1)], 1).is_some());
        assert!(store.replace(&identity(), vec![instance(2)], 3).is_some());
        assert!(store.replace(&identity(), vec![instance(3)], 2).is_none());
        assert!(store.replace(&identity(), vec![instance(4)], 3).is_none());

        assert_eq!(store.lookup(&identity()), vec![instance(2)]);
        assert_eq!(store.version(&identity()), Some(3));
    }

    #[test]
    fn test_delta_creates_entry_at_version_zero() {
        let store = RegistryStore::new();

        assert!(store.apply_delta(&identity(), instance(1), false).is_none());
        assert!(store.version(&identity()).is_none());

        let snapshot = store.apply_delta(&identity(), instance(1), true);
        assert_eq!(snapshot, Some(vec![instance(1)]));
        assert_eq!(store.version(&identity()), Some(0));

        // 版本 0 的全量通知不能覆盖增量创建的条目
        assert!(store.replace(&identity(), Vec::new(), 0).is_none());
    }

    #[test]
    fn test_delta_remove_drops_every_equal_instance() {
        let store = RegistryStore::new();
        store.apply_delta(&identity(), instance(1), true);
        store.apply_delta(&identity(), instance(2), true);
        store.apply_delta(&identity(), instance(1), true);

        let snapshot = store.apply_delta(&identity(), instance(1), false);
        assert_eq!(snapshot, Some(vec![instance(2)]));

        let unchanged = store.apply_delta(&identity(), instance(9), false);
        assert_eq!(unchanged, Some(vec![instance(2)]));
    }

    #[test]
    fn test_lookup_returns_copy() {
        let store = RegistryStore::new();
        store.replace(&identity(), vec![instance(1), instance(2)], 1);

        let mut copy = store.lookup(&identity());
        copy.clear();

        assert_eq!(store.lookup(&identity()).len(), 2);
        assert!(store.lookup(&ServiceIdentity::new("x", "y", "z")).is_empty());
    }
}
