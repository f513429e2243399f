//! Threshold rules
//!
//! Rules run in a fixed order and every rule that fires emits its own
//! alert, so a multi-signal attack is fully described:
//!
//! 1. malformed-packet
//! 2. dos-flood
//! 3. port-scan
//! 4. unauthorized-write
//! 5. abnormal-traffic
//! 6. suspicious-function

use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::config::DetectionConfig;
use crate::core::alert::{AttackKind, Severity, ThreatAlert};
use crate::core::packet::{FunctionKind, PacketMetadata};

use super::source_state::{SourceSnapshot, SourceTable};

/// Minimum write operations before the write/read ratio rule can fire.
const WRITE_RATIO_MIN_WRITES: f64 = 5.0;

pub struct BehavioralAnalyzer {
    config: Arc<DetectionConfig>,
    sources: SourceTable,
}

impl BehavioralAnalyzer {
    pub fn new(config: Arc<DetectionConfig>) -> Self {
        let sources = SourceTable::new(&config);
        Self { config, sources }
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    /// Fold the packet into per-source state, then evaluate every rule.
    pub fn analyze(&self, meta: &PacketMetadata, now: Instant) -> Vec<ThreatAlert> {
        let snapshot = self.sources.update(meta, now);
        let mut alerts = Vec::new();

        if meta.is_malformed {
            alerts.push(
                ThreatAlert::new(
                    AttackKind::MalformedPacket,
                    Severity::High,
                    meta.src_addr,
                    meta.dst_addr,
                    format!(
                        "Malformed {:?} frame ({} bytes) from {}",
                        meta.protocol, meta.packet_size, meta.src_addr
                    ),
                )
                .with_confidence(1.0),
            );
        }

        self.check_flood(meta, &snapshot, &mut alerts);
        self.check_port_scan(meta, &snapshot, &mut alerts);
        self.check_unauthorized_write(meta, &snapshot, &mut alerts);
        self.check_abnormal_traffic(meta, &snapshot, &mut alerts);
        self.check_suspicious_function(meta, &mut alerts);

        if !alerts.is_empty() {
            trace!(
                src = %meta.src_addr,
                count = alerts.len(),
                "behavioral rules fired"
            );
        }
        alerts
    }

    fn check_flood(&self, meta: &PacketMetadata, snap: &SourceSnapshot, alerts: &mut Vec<ThreatAlert>) {
        let packet_ratio = snap.packet_rate / self.config.dos_packet_threshold as f64;
        let byte_ratio = snap.byte_rate / self.config.dos_byte_threshold as f64;
        let ratio = packet_ratio.max(byte_ratio);
        if ratio < 1.0 {
            return;
        }
        alerts.push(
            ThreatAlert::new(
                AttackKind::DosFlood,
                Severity::High,
                meta.src_addr,
                meta.dst_addr,
                format!(
                    "Flood from {}: {:.0} pkts, {:.0} bytes in window",
                    meta.src_addr, snap.packet_rate, snap.byte_rate
                ),
            )
            .with_confidence(ratio.min(1.0) as f32),
        );
    }

    fn check_port_scan(&self, meta: &PacketMetadata, snap: &SourceSnapshot, alerts: &mut Vec<ThreatAlert>) {
        let threshold = self.config.port_scan_threshold as usize;
        if snap.distinct_ports < threshold {
            return;
        }
        let confidence = snap.distinct_ports as f64 / (threshold * 2) as f64;
        alerts.push(
            ThreatAlert::new(
                AttackKind::PortScan,
                Severity::Medium,
                meta.src_addr,
                meta.dst_addr,
                format!(
                    "Port scan from {}: {} distinct destination ports",
                    meta.src_addr, snap.distinct_ports
                ),
            )
            .with_confidence(confidence.min(1.0) as f32),
        );
    }

    fn check_unauthorized_write(
        &self,
        meta: &PacketMetadata,
        snap: &SourceSnapshot,
        alerts: &mut Vec<ThreatAlert>,
    ) {
        if snap.writes < WRITE_RATIO_MIN_WRITES {
            return;
        }
        // No reads at all counts as an unbounded ratio.
        let ratio = if snap.reads > 0.0 {
            snap.writes / snap.reads
        } else {
            f64::INFINITY
        };
        if ratio < self.config.write_read_ratio_threshold {
            return;
        }
        alerts.push(
            ThreatAlert::new(
                AttackKind::UnauthorizedWrite,
                Severity::Critical,
                meta.src_addr,
                meta.dst_addr,
                format!(
                    "Write-heavy traffic from {}: {:.0} writes vs {:.0} reads",
                    meta.src_addr, snap.writes, snap.reads
                ),
            )
            .with_confidence(0.85),
        );
    }

    fn check_abnormal_traffic(
        &self,
        meta: &PacketMetadata,
        snap: &SourceSnapshot,
        alerts: &mut Vec<ThreatAlert>,
    ) {
        if snap.exceptions < self.config.exception_rate_threshold as f64 {
            return;
        }
        alerts.push(
            ThreatAlert::new(
                AttackKind::AbnormalTraffic,
                Severity::Medium,
                meta.src_addr,
                meta.dst_addr,
                format!(
                    "Elevated exception rate from {}: {:.0} in window",
                    meta.src_addr, snap.exceptions
                ),
            )
            .with_confidence(0.7),
        );
    }

    fn check_suspicious_function(&self, meta: &PacketMetadata, alerts: &mut Vec<ThreatAlert>) {
        let Some(fields) = meta.modbus else { return };
        if fields.function != FunctionKind::Diagnostic || fields.is_response {
            return;
        }
        alerts.push(
            ThreatAlert::new(
                AttackKind::SuspiciousFunction,
                Severity::Low,
                meta.src_addr,
                meta.dst_addr,
                format!(
                    "Diagnostic function {:#04x} requested by {} on unit {}",
                    fields.function_code, meta.src_addr, fields.unit_id
                ),
            )
            .with_confidence(0.5),
        );
    }
}
