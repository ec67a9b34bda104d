//! Registry engine module
//!
//! This module contains the registry engine split into logical components:
//! - `types`: Data structures, listener traits and error types
//! - `backend`: Hook trait implemented by the durable store collaborator
//! - `pipeline`: Bounded registration queue and its background worker
//! - `store`: Versioned instance store behind a single read-write lock
//! - `listeners`: Per-service listener lists used for fan-out
//! - `notifier`: Callback entry points driven by the backend
//! - `service`: The engine tying everything together
//! - `memory`: In-process backend

pub mod backend;
pub mod listeners;
pub mod memory;
pub mod notifier;
pub(crate) mod pipeline;
pub mod service;
pub mod stats;
pub mod store;
pub mod types;

// Re-export public types for easier access
pub use backend::RegistryBackend;
pub use memory::{BackendCallStats, InMemoryBackend};
pub use notifier::RegistryNotifier;
pub use service::RegistryEngine;
pub use stats::RegistryStats;
pub use types::{
    Address, BackendError, InstanceRecord, NotifyListener, OfflineListener, ProviderMeta,
    RegistryError, RegistryResult, ServiceIdentity, SharedNotifyListener, SharedOfflineListener,
    VersionedInstanceSet,
};
