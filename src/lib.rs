pub mod config;
pub mod logging;
pub mod services;

pub use config::{ConfigError, RegistryConfig, RetryConfig};
pub use services::event::{EventError, InstanceSnapshot, WatchConfig, WatchHub};
pub use services::registry::{
    Address, BackendError, InMemoryBackend, InstanceRecord, NotifyListener, OfflineListener,
    ProviderMeta, RegistryBackend, RegistryEngine, RegistryError, RegistryNotifier,
    RegistryResult, RegistryStats, ServiceIdentity,
};
