pub mod event;
pub mod registry;

pub use registry::{InstanceRecord, RegistryEngine, RegistryNotifier, ServiceIdentity};
