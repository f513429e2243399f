//! Threat alerts
//!
//! Structured records emitted by the behavioral analyzer and consumed by the
//! mitigation policy and the audit logger.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Attack classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackKind {
    PortScan,
    DosFlood,
    CommandInjection,
    UnauthorizedWrite,
    AbnormalTraffic,
    SuspiciousFunction,
    MalformedPacket,
    Replay,
    MitM,
    BruteForce,
}

impl AttackKind {
    /// Every kind, in counter-index order.
    pub const ALL: [AttackKind; 10] = [
        AttackKind::PortScan,
        AttackKind::DosFlood,
        AttackKind::CommandInjection,
        AttackKind::UnauthorizedWrite,
        AttackKind::AbnormalTraffic,
        AttackKind::SuspiciousFunction,
        AttackKind::MalformedPacket,
        AttackKind::Replay,
        AttackKind::MitM,
        AttackKind::BruteForce,
    ];

    /// Stable index for per-kind counters.
    pub fn index(self) -> usize {
        match self {
            AttackKind::PortScan => 0,
            AttackKind::DosFlood => 1,
            AttackKind::CommandInjection => 2,
            AttackKind::UnauthorizedWrite => 3,
            AttackKind::AbnormalTraffic => 4,
            AttackKind::SuspiciousFunction => 5,
            AttackKind::MalformedPacket => 6,
            AttackKind::Replay => 7,
            AttackKind::MitM => 8,
            AttackKind::BruteForce => 9,
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackKind::PortScan => write!(f, "port_scan"),
            AttackKind::DosFlood => write!(f, "dos_flood"),
            AttackKind::CommandInjection => write!(f, "command_injection"),
            AttackKind::UnauthorizedWrite => write!(f, "unauthorized_write"),
            AttackKind::AbnormalTraffic => write!(f, "abnormal_traffic"),
            AttackKind::SuspiciousFunction => write!(f, "suspicious_function"),
            AttackKind::MalformedPacket => write!(f, "malformed_packet"),
            AttackKind::Replay => write!(f, "replay"),
            AttackKind::MitM => write!(f, "mitm"),
            AttackKind::BruteForce => write!(f, "brute_force"),
        }
    }
}

/// A detected anomaly with its classification, confidence, and mitigation
/// status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub attack: AttackKind,
    pub severity: Severity,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub description: String,
    /// Detection confidence in [0.0, 1.0].
    pub confidence: f32,
    /// Set once the mitigation policy has acted on this alert.
    pub auto_mitigated: bool,
}

impl ThreatAlert {
    pub fn new(
        attack: AttackKind,
        severity: Severity,
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            attack,
            severity,
            src_addr,
            dst_addr,
            description: description.into(),
            confidence: 1.0,
            auto_mitigated: false,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}
