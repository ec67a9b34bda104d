use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 默认日志级别，可通过 `RUST_LOG` 覆盖
pub const DEFAULT_LOG_FILTER: &str = "info";

/// 初始化全局日志，重复调用无副作用
///
/// 已经存在全局 subscriber 时不会 panic，继续使用现有的。
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        let result = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init();

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized, keeping existing one");
        }
    });
}
