use std::sync::atomic::{AtomicU64, Ordering};

/// 注册中心统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// 已入队的注册请求
    pub registrations_enqueued: u64,
    /// 因队列已满被拒绝的注册请求
    pub registrations_rejected: u64,
    /// 后端已确认的注册
    pub registrations_applied: u64,
    /// 失败的注册尝试 (每次重试计一次)
    pub register_failures: u64,
    /// 被接受的全量通知
    pub snapshots_accepted: u64,
    /// 因版本过旧被丢弃的全量通知
    pub snapshots_stale: u64,
    /// 已应用的增量通知
    pub deltas_applied: u64,
    /// 回调被调用的总次数
    pub listener_deliveries: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub registrations_enqueued: AtomicU64,
    pub registrations_rejected: AtomicU64,
    pub registrations_applied: AtomicU64,
    pub register_failures: AtomicU64,
    pub snapshots_accepted: AtomicU64,
    pub snapshots_stale: AtomicU64,
    pub deltas_applied: AtomicU64,
    pub listener_deliveries: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            registrations_enqueued: self.registrations_enqueued.load(Ordering::Relaxed),
            registrations_rejected: self.registrations_rejected.load(Ordering::Relaxed),
            registrations_applied: self.registrations_applied.load(Ordering::Relaxed),
            register_failures: self.register_failures.load(Ordering::Relaxed),
            snapshots_accepted: self.snapshots_accepted.load(Ordering::Relaxed),
            snapshots_stale: self.snapshots_stale.load(Ordering::Relaxed),
            deltas_applied: self.deltas_applied.load(Ordering::Relaxed),
            listener_deliveries: self.listener_deliveries.load(Ordering::Relaxed),
        }
    }
}
