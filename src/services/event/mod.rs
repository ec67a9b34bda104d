pub mod types;
pub mod watch_hub;

pub use types::{EventError, InstanceSnapshot, WatchConfig};
pub use watch_hub::WatchHub;
