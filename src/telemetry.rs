//! Log initialization.
//!
//! `RUST_LOG` wins over the configured level when set, so operators can turn
//! up verbosity without touching the config file.

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

pub fn init_tracing(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter)
        .try_init()
        .ok();
}
