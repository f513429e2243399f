//! modsentry: real-time intrusion detection and prevention for Modbus/TCP
//! SCADA networks.
//!
//! The engine classifies every packet as allowed or dropped on a lock-free
//! hot path, detects behavioral threats (floods, port scans, unauthorized
//! writes, malformed frames), and blocks offending sources automatically.
//!
//! ```no_run
//! use modsentry::{DetectionConfig, PacketInput, Sentry, SubmitResult};
//! use std::net::Ipv4Addr;
//!
//! let mut engine = Sentry::new(DetectionConfig::default(), "sentry.log").unwrap();
//! engine.start().unwrap();
//!
//! let packet = PacketInput::new(
//!     vec![0, 1, 0, 0, 0, 6, 1, 3, 0, 100, 0, 10],
//!     Ipv4Addr::new(192, 168, 1, 10),
//!     Ipv4Addr::new(192, 168, 1, 100),
//!     49152,
//!     502,
//! );
//! match engine.submit(packet) {
//!     SubmitResult::Submitted(handle) => { /* poll handle.decision() */ }
//!     SubmitResult::QueueFull => { /* counted, packet discarded */ }
//!     SubmitResult::Stopped => unreachable!(),
//! }
//!
//! engine.stop().unwrap();
//! ```
//!
//! Packet capture, CLI, configuration files, dashboards, and metric
//! rendering are left to the embedding application.

pub mod analysis;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod mitigation;
pub mod monitor;
pub mod protocols;

pub use crate::core::alert::{AttackKind, Severity, ThreatAlert};
pub use crate::core::packet::{Decision, FunctionKind, PacketInput, PacketMetadata, ProtocolKind};
pub use config::DetectionConfig;
pub use engine::{
    BatchSubmitResult, EngineState, JobHandle, Sentry, SubmitResult, MAX_BATCH,
};
pub use error::{ConfigError, Result, SentryError};
pub use mitigation::{BlockRecord, MitigationEngine};
pub use monitor::metrics::MetricsSnapshot;
pub use monitor::stats::StatsSnapshot;
pub use monitor::{LogLevel, LogRecord};
