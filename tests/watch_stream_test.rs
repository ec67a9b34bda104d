use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;

use registry_engine::{
    Address, BackendError, ConfigError, EventError, InMemoryBackend, InstanceRecord,
    RegistryBackend, RegistryConfig, RegistryEngine, RegistryError, RegistryNotifier,
    ServiceIdentity, WatchConfig, WatchHub,
};

fn setup(config: WatchConfig) -> (RegistryEngine, Arc<InMemoryBackend>, WatchHub) {
    let notifier = RegistryNotifier::new();
    let backend = Arc::new(InMemoryBackend::new(notifier.clone()));
    let engine = RegistryEngine::new(RegistryConfig::default(), notifier, backend.clone());
    let hub = WatchHub::new(engine.clone(), config).expect("Invalid watch config");
    (engine, backend, hub)
}

fn greeter() -> ServiceIdentity {
    ServiceIdentity::new("test", "GreeterService", "2.0.0")
}

fn instance(port: u16) -> InstanceRecord {
    InstanceRecord::new(greeter(), Address::new("10.1.0.7", port))
}

#[tokio::test]
async fn test_watch_receives_snapshots() {
    let (engine, backend, hub) = setup(WatchConfig::default());

    let mut stream = hub.watch(greeter()).await.expect("Failed to watch service");
    assert_eq!(backend.call_stats().subscribe_calls, 1);

    engine
        .notifier()
        .apply_full_snapshot(&greeter(), vec![instance(1), instance(2)], 1);

    let snapshot = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for snapshot")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");

    assert_eq!(snapshot.identity, greeter());
    assert_eq!(snapshot.instances, vec![instance(1), instance(2)]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_multiple_watchers_share_one_subscription() {
    let (engine, backend, hub) = setup(WatchConfig::default());

    let mut stream1 = hub.watch(greeter()).await.expect("Failed to watch (1)");
    let mut stream2 = hub.watch(greeter()).await.expect("Failed to watch (2)");

    // 引擎回调只登记一次
    assert_eq!(backend.call_stats().subscribe_calls, 1);
    assert_eq!(hub.active_channels(), 1);

    engine.notifier().apply_delta(&greeter(), instance(9), true);

    let first = timeout(Duration::from_secs(1), stream1.next())
        .await
        .expect("Timeout waiting on stream1")
        .expect("Stream1 ended unexpectedly")
        .expect("Stream1 error");
    let second = timeout(Duration::from_secs(1), stream2.next())
        .await
        .expect("Timeout waiting on stream2")
        .expect("Stream2 ended unexpectedly")
        .expect("Stream2 error");

    assert_eq!(first.instances, vec![instance(9)]);
    assert_eq!(second, first);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_late_watcher_gets_current_instances_first() {
    let (engine, _backend, hub) = setup(WatchConfig::default());
    engine
        .notifier()
        .apply_full_snapshot(&greeter(), vec![instance(1)], 5);

    let mut stream = hub.watch(greeter()).await.unwrap();
    let initial = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for initial snapshot")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");

    assert_eq!(initial.instances, vec![instance(1)]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_lagging_watcher_reports_skipped_snapshots() {
    let (engine, _backend, hub) = setup(WatchConfig {
        channel_capacity: 1,
        emit_initial: false,
    });
    let notifier = engine.notifier();

    let mut stream = hub.watch(greeter()).await.unwrap();
    for version in 1..=3u64 {
        notifier.apply_full_snapshot(&greeter(), vec![instance(version as u16)], version);
    }

    let lagged = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for lag error")
        .expect("Stream ended unexpectedly");
    assert!(matches!(lagged, Err(EventError::Lagged { skipped: 2 })));

    let latest = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for latest snapshot")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");
    assert_eq!(latest.instances, vec![instance(3)]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_cleanup_inactive_channels() {
    let (engine, _backend, hub) = setup(WatchConfig::default());

    let stream = hub.watch(greeter()).await.unwrap();
    assert_eq!(hub.cleanup_inactive_channels(), 0);

    drop(stream);
    assert_eq!(hub.cleanup_inactive_channels(), 1);
    assert_eq!(hub.active_channels(), 0);

    // 通道被清理后，通知不再转发，也不会出错
    engine
        .notifier()
        .apply_full_snapshot(&greeter(), vec![instance(1)], 1);

    let mut stream = hub.watch(greeter()).await.unwrap();
    let initial = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for initial snapshot")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");
    assert_eq!(initial.instances, vec![instance(1)]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_watch_does_not_repeat_initial_snapshot() {
    let (engine, backend, hub) = setup(WatchConfig::default());
    engine.register(instance(1)).unwrap();
    timeout(Duration::from_secs(1), async {
        while backend.stored_instances(&greeter()).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timeout waiting for registration");

    // 后端在 do_subscribe 时推送当前数据，流里只出现一次
    let mut stream = hub.watch(greeter()).await.unwrap();
    let initial = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for initial snapshot")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");
    assert_eq!(initial.instances, vec![instance(1)]);

    let duplicate = timeout(Duration::from_millis(200), stream.next()).await;
    assert!(duplicate.is_err(), "unexpected snapshot: {duplicate:?}");

    engine.register(instance(2)).unwrap();
    let update = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for update")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");
    assert_eq!(update.instances, vec![instance(1), instance(2)]);

    engine.shutdown().await;
}

// 第一次 do_subscribe 失败的后端
struct FlakySubscribeBackend {
    subscribe_calls: AtomicUsize,
}

#[async_trait]
impl RegistryBackend for FlakySubscribeBackend {
    async fn do_register(&self, _instance: &InstanceRecord) -> Result<(), BackendError> {
        Ok(())
    }

    async fn do_unregister(&self, _instance: &InstanceRecord) -> Result<(), BackendError> {
        Ok(())
    }

    async fn do_subscribe(&self, _identity: &ServiceIdentity) -> Result<(), BackendError> {
        if self.subscribe_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(BackendError::Unavailable("registry offline".to_string()));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_watch_retries_failed_backend_subscription() {
    let backend = Arc::new(FlakySubscribeBackend {
        subscribe_calls: AtomicUsize::new(0),
    });
    let notifier = RegistryNotifier::new();
    let engine = RegistryEngine::new(RegistryConfig::default(), notifier.clone(), backend.clone());
    let hub = WatchHub::new(engine.clone(), WatchConfig::default()).unwrap();

    let first = hub.watch(greeter()).await;
    assert!(matches!(
        first,
        Err(EventError::Registry(RegistryError::Backend(BackendError::Unavailable(_))))
    ));

    // 再次 watch 重新请求后端监听，回调不重复登记
    let mut stream = hub.watch(greeter()).await.expect("Second watch should succeed");
    assert_eq!(backend.subscribe_calls.load(Ordering::SeqCst), 2);

    let _other = hub.watch(greeter()).await.unwrap();
    assert_eq!(backend.subscribe_calls.load(Ordering::SeqCst), 2);

    notifier.apply_full_snapshot(&greeter(), vec![instance(1)], 1);
    let snapshot = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for snapshot")
        .expect("Stream ended unexpectedly")
        .expect("Watch stream error");
    assert_eq!(snapshot.instances, vec![instance(1)]);
    assert_eq!(engine.stats().listener_deliveries, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_zero_channel_capacity_rejected() {
    let notifier = RegistryNotifier::new();
    let backend = Arc::new(InMemoryBackend::new(notifier.clone()));
    let engine = RegistryEngine::new(RegistryConfig::default(), notifier, backend);

    let result = WatchHub::new(
        engine.clone(),
        WatchConfig {
            channel_capacity: 0,
            emit_initial: true,
        },
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_watch_after_shutdown_fails() {
    let (engine, _backend, hub) = setup(WatchConfig::default());
    engine.shutdown().await;

    let result = hub.watch(greeter()).await;
    assert!(matches!(result, Err(EventError::Registry(_))));
}
