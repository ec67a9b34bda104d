use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::types::{EventError, InstanceSnapshot, WatchConfig};
use crate::config::ConfigError;
use crate::services::registry::{InstanceRecord, RegistryEngine, ServiceIdentity};

/// 把注册中心的订阅回调转换成基于 Tokio broadcast 的快照流
#[derive(Clone)]
pub struct WatchHub {
    engine: RegistryEngine,
    /// 服务标识 -> broadcast 发送器的映射
    channels: Arc<DashMap<ServiceIdentity, broadcast::Sender<InstanceSnapshot>>>,
    /// 已向引擎登记回调的服务
    forwarding: Arc<DashSet<ServiceIdentity>>,
    /// 后端监听已建立的服务
    backend_watched: Arc<DashSet<ServiceIdentity>>,
    config: WatchConfig,
}

impl WatchHub {
    pub fn new(engine: RegistryEngine, config: WatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            engine,
            channels: Arc::new(DashMap::new()),
            forwarding: Arc::new(DashSet::new()),
            backend_watched: Arc::new(DashSet::new()),
            config,
        })
    }

    /// 订阅某个服务，返回实例列表快照流
    pub async fn watch(
        &self,
        identity: ServiceIdentity,
    ) -> Result<BoxStream<'static, Result<InstanceSnapshot, EventError>>, EventError> {
        let receiver = self.get_or_create_channel(&identity).subscribe();

        // 每个服务只向引擎登记一次回调；后端监听失败时下次 watch 重试
        let result = if self.forwarding.insert(identity.clone()) {
            let channels = self.channels.clone();
            let forwarded = identity.clone();
            let listener = Arc::new(move |instances: &[InstanceRecord]| {
                Self::forward(&channels, &forwarded, instances);
            });
            self.engine.subscribe(identity.clone(), listener).await
        } else if !self.backend_watched.contains(&identity) {
            self.engine.resubscribe(&identity).await
        } else {
            Ok(())
        };

        if let Err(err) = result {
            tracing::warn!(service = %identity, error = %err, "Backend subscribe failed for watch");
            return Err(err.into());
        }
        self.backend_watched.insert(identity.clone());

        tracing::info!(service = %identity, "New watch stream created");

        let initial = if self.config.emit_initial {
            let instances = self.engine.lookup(&identity);
            (!instances.is_empty()).then(|| {
                Ok(InstanceSnapshot {
                    identity: identity.clone(),
                    instances,
                })
            })
        } else {
            None
        };

        let updates = BroadcastStream::new(receiver).map(|result| {
            result.map_err(|err| match err {
                BroadcastStreamRecvError::Lagged(skipped) => EventError::Lagged { skipped },
            })
        });

        // 订阅期间后端推送的数据可能与初始快照相同，连续重复的快照只发一次
        let mut last: Option<Vec<InstanceRecord>> = None;
        let stream = stream::iter(initial).chain(updates).filter_map(move |item| {
            let emit = match &item {
                Ok(snapshot) if last.as_ref() == Some(&snapshot.instances) => false,
                Ok(snapshot) => {
                    last = Some(snapshot.instances.clone());
                    true
                }
                Err(_) => {
                    last = None;
                    true
                }
            };
            future::ready(emit.then_some(item))
        });

        Ok(stream.boxed())
    }

    /// 当前存在的广播通道数量
    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }

    /// 清理没有接收者的通道
    pub fn cleanup_inactive_channels(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|identity, sender| {
            let keep = sender.receiver_count() > 0;
            if !keep {
                tracing::debug!(service = %identity, "Cleaned up inactive watch channel");
            }
            keep
        });
        before - self.channels.len()
    }

    fn forward(
        channels: &DashMap<ServiceIdentity, broadcast::Sender<InstanceSnapshot>>,
        identity: &ServiceIdentity,
        instances: &[InstanceRecord],
    ) {
        let Some(sender) = channels.get(identity).map(|entry| entry.value().clone()) else {
            return;
        };

        let snapshot = InstanceSnapshot {
            identity: identity.clone(),
            instances: instances.to_vec(),
        };

        // 没有接收者时发送失败，忽略即可
        if let Ok(receivers) = sender.send(snapshot) {
            tracing::debug!(service = %identity, receivers = receivers, "Forwarded snapshot to watchers");
        }
    }

    fn get_or_create_channel(&self, identity: &ServiceIdentity) -> broadcast::Sender<InstanceSnapshot> {
        self.channels
            .entry(identity.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    service = %identity,
                    capacity = self.config.channel_capacity,
                    "Created new broadcast channel for service"
                );
                broadcast::channel(self.config.channel_capacity).0
            })
            .value()
            .clone()
    }
}

impl std::fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHub")
            .field("channels", &self.channels.len())
            .field("config", &self.config)
            .finish()
    }
}
