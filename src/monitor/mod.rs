//! Observability: counters, latency/throughput trackers, and the async
//! audit logger.

pub mod logger;
pub mod metrics;
pub mod stats;

pub use logger::{AsyncLogger, LogLevel, LogRecord};
pub use metrics::{
    LatencyStats, LatencyTracker, MetricsManager, MetricsSnapshot, ThroughputStats,
    ThroughputTracker,
};
pub use stats::{Statistics, StatsSnapshot};
