//! # Configuration
//!
//! Client-side configuration for the realtime layer and its front-ends:
//! endpoints, reconnection policy, reconciliation timeout and logging.

pub mod client;

pub use client::{
    Config, ConfigError, DispatchConfig, FeedConfig, LogFormat, LoggingConfig,
    ReconciliationConfig, ReconnectConfig, ServerConfig,
};
