use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashSet;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;

use super::backend::RegistryBackend;
use super::stats::StatsCounters;
use super::types::{BackendError, InstanceRecord, RegistryError, RegistryResult};

/// 有界注册队列，单个消费者
#[derive(Debug)]
pub(crate) struct RegistrationQueue {
    items: Mutex<VecDeque<InstanceRecord>>,
    capacity: usize,
    available: Notify,
}

impl RegistrationQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            available: Notify::new(),
        }
    }

    /// 入队，队列已满时立即失败
    pub(crate) fn try_push(&self, instance: InstanceRecord) -> RegistryResult<()> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(RegistryError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            items.push_back(instance);
        }
        self.available.notify_one();
        Ok(())
    }

    // 失败重试的条目放回队尾，不受容量限制，保证不会丢失
    fn requeue(&self, instance: InstanceRecord) {
        self.items.lock().push_back(instance);
        self.available.notify_one();
    }

    /// 等待下一个条目，收到关闭信号时返回 `None`
    async fn pop(&self, cancel: &CancellationToken) -> Option<InstanceRecord> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let next = self.items.lock().pop_front();
            if next.is_some() {
                return next;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = self.available.notified() => {}
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 注册工作任务依赖的共享状态
pub(crate) struct RegistrationWorker {
    pub queue: Arc<RegistrationQueue>,
    pub backend: Arc<dyn RegistryBackend>,
    pub published: Arc<DashSet<InstanceRecord>>,
    pub stats: Arc<StatsCounters>,
    pub retry: RetryConfig,
    pub cancel: CancellationToken,
}

impl RegistrationWorker {
    /// 逐个把注册请求写入后端。失败的条目放回队尾并按退避等待后继续，
    /// 重试次数不设上限。
    pub(crate) async fn run(self) {
        tracing::info!(capacity = self.queue.capacity(), "Registration worker started");

        let mut consecutive_failures: u32 = 0;

        while let Some(instance) = self.queue.pop(&self.cancel).await {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = AssertUnwindSafe(self.backend.do_register(&instance)).catch_unwind() => {
                    // 后端 panic 按一次失败处理，工作任务继续运行
                    Some(result.unwrap_or_else(|panic| Err(panic_to_error(panic))))
                }
            };

            // 关闭时中断的请求放回队列
            let Some(result) = attempt else {
                self.queue.requeue(instance);
                break;
            };

            match result {
                Ok(()) => {
                    consecutive_failures = 0;
                    StatsCounters::incr(&self.stats.registrations_applied);
                    tracing::debug!(
                        service = %instance.identity,
                        address = %instance.address,
                        "Registered instance with backend"
                    );
                    self.published.insert(instance);
                }
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    StatsCounters::incr(&self.stats.register_failures);

                    let backoff = self.retry.backoff_for(consecutive_failures);
                    tracing::warn!(
                        service = %instance.identity,
                        address = %instance.address,
                        error = %err,
                        attempt = consecutive_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "Register failed, will try again"
                    );

                    self.queue.requeue(instance);

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        tracing::info!(pending = self.queue.len(), "Registration worker stopped");
    }
}

fn panic_to_error(panic: Box<dyn Any + Send>) -> BackendError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    BackendError::Internal(format!("do_register panicked: {message}"))
}
