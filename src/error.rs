use std::net::AddrParseError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SentryError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid address: {0}")]
    Address(#[from] AddrParseError),

    #[error("engine is not running")]
    NotRunning,

    #[error("log sink error: {0}")]
    Sink(#[from] std::io::Error),
}

/// Configuration validation failures. Raised only at construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroThreshold { name: &'static str },

    #[error("{name} window must be non-zero")]
    ZeroWindow { name: &'static str },

    #[error("{name} must be a power of two, got {value}")]
    NotPowerOfTwo { name: &'static str, value: usize },

    #[error("{name} must be at least 2, got {value}")]
    CapacityTooSmall { name: &'static str, value: usize },

    #[error("worker_count must be at least 1")]
    NoWorkers,

    #[error("write_read_ratio_threshold must be a positive finite number")]
    InvalidRatio,
}

pub type Result<T> = std::result::Result<T, SentryError>;
