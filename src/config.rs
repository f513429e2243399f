//! Detection configuration
//!
//! All tunables for the engine. Frozen at construction; runtime changes go
//! through the explicit block/unblock/whitelist methods on the engine.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Packets per window from one source above which dos-flood is raised
    pub dos_packet_threshold: u32,
    /// Bytes per window from one source above which dos-flood is raised
    pub dos_byte_threshold: u64,
    /// Window length for the flood counters
    pub dos_window: Duration,

    /// Distinct destination ports within the window that trigger port-scan
    pub port_scan_threshold: u32,
    /// Window length for the port-scan counter
    pub port_scan_window: Duration,

    /// Write/read ratio above which unauthorized-write is raised (with >= 5 writes)
    pub write_read_ratio_threshold: f64,
    /// Modbus exception responses per window that trigger abnormal-traffic
    pub exception_rate_threshold: u32,

    /// Sources that are always allowed and never analyzed
    pub whitelisted_addresses: HashSet<Ipv4Addr>,
    /// Ports on which protocol parsing and analysis is applied
    pub monitored_ports: HashSet<u16>,

    /// Whether detector-raised threats lead to blocking
    pub auto_block_enabled: bool,
    /// Expiry applied to new blocks
    pub auto_block_duration: Duration,
    /// Upper bound on the active block set
    pub max_concurrent_blocks: usize,

    /// Ingestion queue capacity (power of two)
    pub packet_queue_capacity: usize,
    /// Log ring capacity (power of two)
    pub log_queue_capacity: usize,
    /// Worker pool size
    pub worker_count: usize,

    /// Process packets still queued when the engine stops
    pub drain_on_stop: bool,
    /// Restart a worker in place after a panic instead of stopping the engine
    pub worker_supervision: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            dos_packet_threshold: 1000,
            dos_byte_threshold: 10_000_000,
            dos_window: Duration::from_secs(5),
            port_scan_threshold: 10,
            port_scan_window: Duration::from_secs(10),
            write_read_ratio_threshold: 5.0,
            exception_rate_threshold: 10,
            whitelisted_addresses: HashSet::new(),
            monitored_ports: [502, 20000].into_iter().collect(),
            auto_block_enabled: true,
            auto_block_duration: Duration::from_secs(60 * 60),
            max_concurrent_blocks: 1000,
            packet_queue_capacity: 4096,
            log_queue_capacity: 8192,
            worker_count: num_cpus::get().max(1),
            drain_on_stop: true,
            worker_supervision: true,
        }
    }
}

impl DetectionConfig {
    /// Higher thresholds, shorter blocks. For networks with bursty but
    /// legitimate traffic.
    pub fn conservative() -> Self {
        Self {
            dos_packet_threshold: 2000,
            port_scan_threshold: 20,
            write_read_ratio_threshold: 10.0,
            auto_block_duration: Duration::from_secs(30 * 60),
            ..Self::default()
        }
    }

    /// Lower thresholds, longer blocks. For networks where any anomaly is
    /// suspect.
    pub fn aggressive() -> Self {
        Self {
            dos_packet_threshold: 500,
            port_scan_threshold: 5,
            write_read_ratio_threshold: 2.0,
            auto_block_duration: Duration::from_secs(2 * 60 * 60),
            ..Self::default()
        }
    }

    /// Validate every field. Called by the engine constructor; an invalid
    /// configuration never produces an engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dos_packet_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                name: "dos_packet_threshold",
            });
        }
        if self.dos_byte_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                name: "dos_byte_threshold",
            });
        }
        if self.port_scan_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                name: "port_scan_threshold",
            });
        }
        if self.exception_rate_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                name: "exception_rate_threshold",
            });
        }
        if self.max_concurrent_blocks == 0 {
            return Err(ConfigError::ZeroThreshold {
                name: "max_concurrent_blocks",
            });
        }
        if self.dos_window.is_zero() {
            return Err(ConfigError::ZeroWindow { name: "dos_window" });
        }
        if self.port_scan_window.is_zero() {
            return Err(ConfigError::ZeroWindow {
                name: "port_scan_window",
            });
        }
        if self.auto_block_duration.is_zero() {
            return Err(ConfigError::ZeroWindow {
                name: "auto_block_duration",
            });
        }
        if !self.write_read_ratio_threshold.is_finite() || self.write_read_ratio_threshold <= 0.0 {
            return Err(ConfigError::InvalidRatio);
        }
        // The queue slots need at least one producer and one consumer
        // position, so a capacity of 1 is rejected even though it is a
        // power of two.
        if self.packet_queue_capacity < 2 {
            return Err(ConfigError::CapacityTooSmall {
                name: "packet_queue_capacity",
                value: self.packet_queue_capacity,
            });
        }
        if !self.packet_queue_capacity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                name: "packet_queue_capacity",
                value: self.packet_queue_capacity,
            });
        }
        if self.log_queue_capacity < 2 {
            return Err(ConfigError::CapacityTooSmall {
                name: "log_queue_capacity",
                value: self.log_queue_capacity,
            });
        }
        if !self.log_queue_capacity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                name: "log_queue_capacity",
                value: self.log_queue_capacity,
            });
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Bound on tracked sources before least-recently-seen eviction kicks in.
    pub fn max_sources(&self) -> usize {
        self.max_concurrent_blocks.saturating_mul(100)
    }

    /// Idle time after which per-source state is garbage collected.
    pub fn source_idle_timeout(&self) -> Duration {
        self.dos_window * 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
        assert!(DetectionConfig::conservative().validate().is_ok());
        assert!(DetectionConfig::aggressive().validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let cfg = DetectionConfig {
            dos_packet_threshold: 0,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroThreshold {
                name: "dos_packet_threshold"
            })
        );
    }

    #[test]
    fn test_queue_capacity_must_be_power_of_two() {
        let cfg = DetectionConfig {
            packet_queue_capacity: 1000,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotPowerOfTwo {
                name: "packet_queue_capacity",
                value: 1000
            })
        ));
    }

    #[test]
    fn test_queue_capacity_of_one_rejected() {
        let cfg = DetectionConfig {
            packet_queue_capacity: 1,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CapacityTooSmall {
                name: "packet_queue_capacity",
                value: 1
            })
        );
        let cfg = DetectionConfig {
            log_queue_capacity: 1,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CapacityTooSmall {
                name: "log_queue_capacity",
                value: 1
            })
        );
    }

    #[test]
    fn test_zero_workers_rejected() {
        let cfg = DetectionConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::NoWorkers));
    }

    #[test]
    fn test_presets_diverge_from_default() {
        let default = DetectionConfig::default();
        let conservative = DetectionConfig::conservative();
        let aggressive = DetectionConfig::aggressive();
        assert!(conservative.dos_packet_threshold > default.dos_packet_threshold);
        assert!(aggressive.dos_packet_threshold < default.dos_packet_threshold);
        assert!(aggressive.auto_block_duration > conservative.auto_block_duration);
    }

    #[test]
    fn test_derived_bounds() {
        let cfg = DetectionConfig::default();
        assert_eq!(cfg.max_sources(), 100_000);
        assert_eq!(cfg.source_idle_timeout(), Duration::from_secs(50));
    }
}
