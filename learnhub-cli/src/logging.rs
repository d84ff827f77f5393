//! Tracing subscriber setup driven by the client configuration.

use shared::config::{Config, LogFormat};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn initialize_tracing(config: &Config) -> String {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.logging.level.clone()
}

fn default_level(config: &Config) -> LevelFilter {
    config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO)
}

fn build_env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level(config).into())
            .from_env_lossy()
    })
}
