use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use super::backend::RegistryBackend;
use super::notifier::RegistryNotifier;
use super::pipeline::{RegistrationQueue, RegistrationWorker};
use super::stats::{RegistryStats, StatsCounters};
use super::types::{
    Address, InstanceRecord, RegistryError, RegistryResult, ServiceIdentity,
    SharedNotifyListener, SharedOfflineListener,
};
use crate::config::RegistryConfig;

// 注册中心引擎
//
// 克隆共享同一个实例。最后一个克隆被丢弃时注册任务也会停止，
// 但后端的 destroy 只会在显式 shutdown 时调用。
#[derive(Clone)]
pub struct RegistryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    engine_id: Uuid,
    config: RegistryConfig,
    backend: Arc<dyn RegistryBackend>,
    queue: Arc<RegistrationQueue>,
    notifier: RegistryNotifier,
    // Consumer 已订阅的服务
    subscribed: Arc<DashSet<ServiceIdentity>>,
    // Provider 已发布的注册信息
    published: Arc<DashSet<InstanceRecord>>,
    stats: Arc<StatsCounters>,
    shutdown: AtomicBool,
    cancel: CancellationToken,
    task_tracker: TaskTracker,
}

impl RegistryEngine {
    /// 创建引擎并启动注册任务，必须在 tokio 运行时内调用。
    ///
    /// `notifier` 通常事先交给 `backend`，后端据此回调全量/增量通知。
    pub fn new(
        config: RegistryConfig,
        notifier: RegistryNotifier,
        backend: Arc<dyn RegistryBackend>,
    ) -> Self {
        let engine_id = Uuid::new_v4();
        let queue = Arc::new(RegistrationQueue::new(config.queue_capacity));
        let published = Arc::new(DashSet::new());
        let stats = notifier.stats.clone();
        let cancel = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let worker = RegistrationWorker {
            queue: queue.clone(),
            backend: backend.clone(),
            published: published.clone(),
            stats: stats.clone(),
            retry: config.retry.clone(),
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("registry.worker", engine_id = %engine_id);
        task_tracker.spawn(worker.run().instrument(span));

        tracing::info!(
            engine_id = %engine_id,
            queue_capacity = config.queue_capacity,
            "Registry engine started"
        );

        Self {
            inner: Arc::new(EngineInner {
                engine_id,
                config,
                backend,
                queue,
                notifier,
                subscribed: Arc::new(DashSet::new()),
                published,
                stats,
                shutdown: AtomicBool::new(false),
                cancel,
                task_tracker,
            }),
        }
    }

    /// 异步注册。只负责入队，队列已满时立即返回 `CapacityExceeded`。
    pub fn register(&self, instance: InstanceRecord) -> RegistryResult<()> {
        if self.is_shutdown() {
            return Err(RegistryError::ShutDown);
        }

        let service = instance.identity.clone();
        let address = instance.address.clone();

        match self.inner.queue.try_push(instance) {
            Ok(()) => {
                StatsCounters::incr(&self.inner.stats.registrations_enqueued);
                tracing::debug!(service = %service, address = %address, "Queued registration");
                Ok(())
            }
            Err(err) => {
                StatsCounters::incr(&self.inner.stats.registrations_rejected);
                tracing::warn!(
                    service = %service,
                    address = %address,
                    error = %err,
                    "Rejected registration"
                );
                Err(err)
            }
        }
    }

    /// 同步注销，直接调用后端，不排队也不重试
    pub async fn unregister(&self, instance: InstanceRecord) -> RegistryResult<()> {
        self.inner.backend.do_unregister(&instance).await?;
        self.inner.published.remove(&instance);

        tracing::info!(
            service = %instance.identity,
            address = %instance.address,
            "Unregistered instance"
        );
        Ok(())
    }

    /// 记录订阅回调，并要求后端开始监听该服务
    pub async fn subscribe(
        &self,
        identity: ServiceIdentity,
        listener: SharedNotifyListener,
    ) -> RegistryResult<()> {
        if self.is_shutdown() {
            return Err(RegistryError::ShutDown);
        }

        self.inner.notifier.listeners.add(&identity, listener);
        self.inner.subscribed.insert(identity.clone());

        tracing::info!(
            service = %identity,
            listeners = self.inner.notifier.listeners.count(&identity),
            "Subscribed to service"
        );

        self.inner.backend.do_subscribe(&identity).await?;
        Ok(())
    }

    /// 只向后端重新发起监听，不登记新的回调。
    ///
    /// 用于 `subscribe` 的后端调用失败之后重试，已登记的回调保持不变。
    pub async fn resubscribe(&self, identity: &ServiceIdentity) -> RegistryResult<()> {
        if self.is_shutdown() {
            return Err(RegistryError::ShutDown);
        }

        self.inner.subscribed.insert(identity.clone());
        tracing::debug!(service = %identity, "Retrying backend subscription");

        self.inner.backend.do_subscribe(identity).await?;
        Ok(())
    }

    pub fn lookup(&self, identity: &ServiceIdentity) -> Vec<InstanceRecord> {
        self.inner.notifier.lookup(identity)
    }

    pub fn offline_listening(&self, address: &Address, listener: SharedOfflineListener) {
        self.inner.backend.offline_listening(address, listener);
    }

    pub fn offline(&self, address: &Address) {
        tracing::debug!(address = %address, "Address reported offline");
        self.inner.backend.offline(address);
    }

    /// 后端回调引擎使用的句柄
    pub fn notifier(&self) -> RegistryNotifier {
        self.inner.notifier.clone()
    }

    pub fn subscribed_identities(&self) -> Vec<ServiceIdentity> {
        self.inner.subscribed.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn published_instances(&self) -> Vec<InstanceRecord> {
        self.inner.published.iter().map(|entry| entry.key().clone()).collect()
    }

    /// 等待写入后端的注册请求数量
    pub fn pending_registrations(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn engine_id(&self) -> Uuid {
        self.inner.engine_id
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// 关闭引擎，重复或并发调用只执行一次。
    ///
    /// 唤醒并停止注册任务，调用后端 destroy (错误只记录日志)，
    /// 然后等待注册任务退出。
    pub async fn shutdown(&self) {
        if self
            .inner
            .shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::info!(
            engine_id = %self.inner.engine_id,
            pending = self.inner.queue.len(),
            "Shutting down registry engine"
        );

        self.inner.cancel.cancel();
        self.inner.task_tracker.close();

        if let Err(err) = self.inner.backend.destroy().await {
            tracing::warn!(
                engine_id = %self.inner.engine_id,
                error = %err,
                "Backend destroy failed, ignoring"
            );
        }

        self.inner.task_tracker.wait().await;
        tracing::info!(engine_id = %self.inner.engine_id, "Registry engine stopped");
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RegistryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEngine")
            .field("engine_id", &self.inner.engine_id)
            .field("config", &self.inner.config)
            .field("pending", &self.inner.queue.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
