//! Mitigation engine
//!
//! Authoritative block table plus whitelist. Hot-path readers take shared
//! locks only; the single-writer discipline lives in the mitigation-policy
//! step and the admin surface.

pub mod bloom;

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::core::alert::{AttackKind, Severity, ThreatAlert};

pub use bloom::{AtomicBloom, RebuildableBloom};

/// One blocked source.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub addr: Ipv4Addr,
    /// Attack that triggered the block; `None` for administrative blocks.
    pub reason: Option<AttackKind>,
    /// Wall-clock time for reporting.
    pub blocked_at: DateTime<Utc>,
    /// Monotonic expiry; `None` means permanent.
    pub expires_at: Option<Instant>,
    /// How many times this source re-offended while blocked or re-blocked.
    pub violations: u32,
}

impl BlockRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => now >= at,
            None => false,
        }
    }

    /// Seconds until expiry, `None` for permanent blocks.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Action chosen by the mitigation policy for one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MitigationAction {
    /// Log only; the packet proceeds.
    LogOnly,
    /// Drop the current packet without blocking the source.
    DropPacket,
    /// Block the source and drop the packet.
    BlockSource,
}

/// Outcome of a `block` call, for the caller's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOutcome {
    /// A new record was inserted (false when an existing block was extended).
    pub inserted: bool,
    /// An older record was evicted to make room.
    pub evicted: bool,
    /// The table was full of permanent records and the insert was refused.
    pub refused: bool,
}

/// Authoritative block table and whitelist.
pub struct MitigationEngine {
    config: Arc<DetectionConfig>,
    blocks: RwLock<HashMap<Ipv4Addr, BlockRecord>>,
    whitelist: RwLock<HashSet<Ipv4Addr>>,
}

impl MitigationEngine {
    pub fn new(config: Arc<DetectionConfig>) -> Self {
        let whitelist = config.whitelisted_addresses.clone();
        Self {
            config,
            blocks: RwLock::new(HashMap::new()),
            whitelist: RwLock::new(whitelist.into_iter().collect()),
        }
    }

    /// True iff a non-expired block record exists for `addr`.
    #[inline]
    pub fn is_blocked(&self, addr: Ipv4Addr, now: Instant) -> bool {
        self.blocks
            .read()
            .get(&addr)
            .map(|r| !r.is_expired(now))
            .unwrap_or(false)
    }

    #[inline]
    pub fn is_whitelisted(&self, addr: Ipv4Addr) -> bool {
        self.whitelist.read().contains(&addr)
    }

    /// Insert or extend a block. Extension keeps the later expiry and bumps
    /// the violation count. Whitelisted sources are never blocked.
    ///
    /// `duration = None` creates a permanent block.
    pub fn block(
        &self,
        addr: Ipv4Addr,
        reason: Option<AttackKind>,
        duration: Option<Duration>,
        now: Instant,
    ) -> BlockOutcome {
        if self.is_whitelisted(addr) {
            debug!(%addr, "refusing to block whitelisted source");
            return BlockOutcome {
                inserted: false,
                evicted: false,
                refused: true,
            };
        }

        let new_expiry = duration.map(|d| now + d);
        let mut blocks = self.blocks.write();

        if let Some(record) = blocks.get_mut(&addr) {
            record.violations += 1;
            record.reason = reason;
            record.expires_at = match (record.expires_at, new_expiry) {
                (None, _) | (_, None) => None,
                (Some(a), Some(b)) => Some(a.max(b)),
            };
            return BlockOutcome {
                inserted: false,
                evicted: false,
                refused: false,
            };
        }

        let mut evicted = false;
        if blocks.len() >= self.config.max_concurrent_blocks {
            // Evict the record closest to expiring on its own.
            let victim = blocks
                .iter()
                .filter_map(|(a, r)| r.expires_at.map(|at| (at, *a)))
                .min()
                .map(|(_, a)| a);
            match victim {
                Some(victim) => {
                    blocks.remove(&victim);
                    evicted = true;
                }
                None => {
                    // Every record is permanent; refuse silently.
                    return BlockOutcome {
                        inserted: false,
                        evicted: false,
                        refused: true,
                    };
                }
            }
        }

        blocks.insert(
            addr,
            BlockRecord {
                addr,
                reason,
                blocked_at: Utc::now(),
                expires_at: new_expiry,
                violations: 1,
            },
        );
        BlockOutcome {
            inserted: true,
            evicted,
            refused: false,
        }
    }

    /// Remove a block. Returns whether a record existed.
    pub fn unblock(&self, addr: Ipv4Addr) -> bool {
        self.blocks.write().remove(&addr).is_some()
    }

    pub fn add_whitelist(&self, addr: Ipv4Addr) {
        // A whitelisted source cannot stay blocked.
        self.unblock(addr);
        self.whitelist.write().insert(addr);
    }

    pub fn remove_whitelist(&self, addr: Ipv4Addr) -> bool {
        self.whitelist.write().remove(&addr)
    }

    /// Drop expired records. Returns how many were removed.
    pub fn cleanup(&self, now: Instant) -> usize {
        let mut blocks = self.blocks.write();
        let before = blocks.len();
        blocks.retain(|_, r| !r.is_expired(now));
        before - blocks.len()
    }

    /// Clone the active (non-expired) records.
    pub fn snapshot(&self, now: Instant) -> Vec<BlockRecord> {
        self.blocks
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn active_blocks(&self, now: Instant) -> usize {
        self.blocks
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .count()
    }

    /// Feed every active block into `f`. Used to rebuild the blocked-address
    /// cache from authoritative state.
    pub fn for_each_blocked(&self, now: Instant, mut f: impl FnMut(Ipv4Addr)) {
        for (addr, record) in self.blocks.read().iter() {
            if !record.is_expired(now) {
                f(*addr);
            }
        }
    }

    /// Feed every whitelisted address into `f`.
    pub fn for_each_whitelisted(&self, mut f: impl FnMut(Ipv4Addr)) {
        for addr in self.whitelist.read().iter() {
            f(*addr);
        }
    }

    /// Rough resident size for the memory estimate.
    pub fn approx_bytes(&self) -> usize {
        self.blocks.read().len() * std::mem::size_of::<(Ipv4Addr, BlockRecord)>()
            + self.whitelist.read().len() * std::mem::size_of::<Ipv4Addr>()
    }

    /// Pre-analysis rate gate: a source already past the flood threshold is
    /// dropped without paying for the analyzer.
    #[inline]
    pub fn should_drop(&self, current_packet_rate: f64) -> bool {
        self.config.auto_block_enabled
            && current_packet_rate >= self.config.dos_packet_threshold as f64
    }

    /// Apply the severity policy to one alert and perform the chosen action.
    pub fn mitigate(&self, alert: &ThreatAlert, now: Instant) -> (MitigationAction, BlockOutcome) {
        let no_block = BlockOutcome {
            inserted: false,
            evicted: false,
            refused: false,
        };
        if alert.severity >= Severity::High {
            if !self.config.auto_block_enabled {
                // Still too serious to let the packet through.
                return (MitigationAction::DropPacket, no_block);
            }
            let outcome = self.block(
                alert.src_addr,
                Some(alert.attack),
                Some(self.config.auto_block_duration),
                now,
            );
            (MitigationAction::BlockSource, outcome)
        } else if alert.severity == Severity::Medium {
            (MitigationAction::DropPacket, no_block)
        } else {
            (MitigationAction::LogOnly, no_block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MitigationEngine {
        MitigationEngine::new(Arc::new(DetectionConfig::default()))
    }

    fn engine_with(config: DetectionConfig) -> MitigationEngine {
        MitigationEngine::new(Arc::new(config))
    }

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_block_and_query() {
        let engine = engine();
        let now = Instant::now();
        assert!(!engine.is_blocked(addr(1), now));
        let outcome = engine.block(addr(1), Some(AttackKind::DosFlood), Some(Duration::from_secs(60)), now);
        assert!(outcome.inserted);
        assert!(engine.is_blocked(addr(1), now));
    }

    #[test]
    fn test_block_expires_without_unblock() {
        let engine = engine();
        let now = Instant::now();
        engine.block(addr(2), Some(AttackKind::PortScan), Some(Duration::from_secs(60)), now);
        assert!(engine.is_blocked(addr(2), now + Duration::from_secs(59)));
        assert!(!engine.is_blocked(addr(2), now + Duration::from_secs(61)));
    }

    #[test]
    fn test_unblock_takes_effect() {
        let engine = engine();
        let now = Instant::now();
        engine.block(addr(3), Some(AttackKind::DosFlood), Some(Duration::from_secs(60)), now);
        assert!(engine.unblock(addr(3)));
        assert!(!engine.is_blocked(addr(3), now));
        assert!(!engine.unblock(addr(3)));
    }

    #[test]
    fn test_extension_keeps_later_expiry_and_counts_violations() {
        let engine = engine();
        let now = Instant::now();
        engine.block(addr(4), Some(AttackKind::DosFlood), Some(Duration::from_secs(600)), now);
        engine.block(addr(4), Some(AttackKind::PortScan), Some(Duration::from_secs(10)), now);
        let snap = engine.snapshot(now);
        assert_eq!(snap.len(), 1);
        let record = &snap[0];
        assert_eq!(record.violations, 2);
        assert_eq!(record.reason, Some(AttackKind::PortScan));
        // Short re-block must not shorten the original expiry.
        assert!(record.remaining(now).unwrap() >= Duration::from_secs(599));
    }

    #[test]
    fn test_permanent_block_never_expires() {
        let engine = engine();
        let now = Instant::now();
        engine.block(addr(5), Some(AttackKind::MitM), None, now);
        assert!(engine.is_blocked(addr(5), now + Duration::from_secs(86_400 * 365)));
        // Extending a permanent block keeps it permanent.
        engine.block(addr(5), Some(AttackKind::MitM), Some(Duration::from_secs(1)), now);
        assert!(engine.is_blocked(addr(5), now + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_capacity_evicts_earliest_expiry() {
        let config = DetectionConfig {
            max_concurrent_blocks: 3,
            ..Default::default()
        };
        let engine = engine_with(config);
        let now = Instant::now();
        engine.block(addr(1), Some(AttackKind::DosFlood), Some(Duration::from_secs(10)), now);
        engine.block(addr(2), Some(AttackKind::DosFlood), Some(Duration::from_secs(100)), now);
        engine.block(addr(3), Some(AttackKind::DosFlood), Some(Duration::from_secs(50)), now);
        let outcome = engine.block(addr(4), Some(AttackKind::DosFlood), Some(Duration::from_secs(30)), now);
        assert!(outcome.inserted);
        assert!(outcome.evicted);
        // addr(1) had the earliest expiry.
        assert!(!engine.is_blocked(addr(1), now));
        assert!(engine.is_blocked(addr(2), now));
        assert_eq!(engine.active_blocks(now), 3);
    }

    #[test]
    fn test_full_table_of_permanents_refuses() {
        let config = DetectionConfig {
            max_concurrent_blocks: 2,
            ..Default::default()
        };
        let engine = engine_with(config);
        let now = Instant::now();
        engine.block(addr(1), Some(AttackKind::MitM), None, now);
        engine.block(addr(2), Some(AttackKind::MitM), None, now);
        let outcome = engine.block(addr(3), Some(AttackKind::DosFlood), Some(Duration::from_secs(10)), now);
        assert!(outcome.refused);
        assert!(!engine.is_blocked(addr(3), now));
    }

    #[test]
    fn test_whitelisted_source_cannot_be_blocked() {
        let engine = engine();
        let now = Instant::now();
        engine.add_whitelist(addr(9));
        let outcome = engine.block(addr(9), Some(AttackKind::DosFlood), Some(Duration::from_secs(60)), now);
        assert!(outcome.refused);
        assert!(!engine.is_blocked(addr(9), now));
    }

    #[test]
    fn test_whitelist_add_removes_existing_block() {
        let engine = engine();
        let now = Instant::now();
        engine.block(addr(10), Some(AttackKind::DosFlood), Some(Duration::from_secs(60)), now);
        engine.add_whitelist(addr(10));
        assert!(!engine.is_blocked(addr(10), now));
        assert!(engine.remove_whitelist(addr(10)));
        assert!(!engine.remove_whitelist(addr(10)));
    }

    #[test]
    fn test_cleanup_removes_expired_only() {
        let engine = engine();
        let now = Instant::now();
        engine.block(addr(1), Some(AttackKind::DosFlood), Some(Duration::from_secs(5)), now);
        engine.block(addr(2), Some(AttackKind::DosFlood), Some(Duration::from_secs(500)), now);
        engine.block(addr(3), Some(AttackKind::MitM), None, now);
        let removed = engine.cleanup(now + Duration::from_secs(10));
        assert_eq!(removed, 1);
        assert_eq!(engine.active_blocks(now + Duration::from_secs(10)), 2);
    }

    #[test]
    fn test_mitigation_policy_by_severity() {
        let engine = engine();
        let now = Instant::now();
        let src = addr(20);
        let dst = addr(100);

        let critical = ThreatAlert::new(AttackKind::UnauthorizedWrite, Severity::Critical, src, dst, "w");
        let (action, outcome) = engine.mitigate(&critical, now);
        assert_eq!(action, MitigationAction::BlockSource);
        assert!(outcome.inserted);
        assert!(engine.is_blocked(src, now));

        let medium = ThreatAlert::new(AttackKind::PortScan, Severity::Medium, addr(21), dst, "s");
        let (action, _) = engine.mitigate(&medium, now);
        assert_eq!(action, MitigationAction::DropPacket);
        assert!(!engine.is_blocked(addr(21), now));

        let low = ThreatAlert::new(AttackKind::SuspiciousFunction, Severity::Low, addr(22), dst, "d");
        let (action, _) = engine.mitigate(&low, now);
        assert_eq!(action, MitigationAction::LogOnly);
    }

    #[test]
    fn test_policy_without_auto_block() {
        let config = DetectionConfig {
            auto_block_enabled: false,
            ..Default::default()
        };
        let engine = engine_with(config);
        let now = Instant::now();
        let alert = ThreatAlert::new(AttackKind::DosFlood, Severity::High, addr(30), addr(100), "f");
        let (action, _) = engine.mitigate(&alert, now);
        assert_eq!(action, MitigationAction::DropPacket);
        assert!(!engine.is_blocked(addr(30), now));
    }

    #[test]
    fn test_should_drop_gate() {
        let engine = engine();
        assert!(!engine.should_drop(10.0));
        assert!(engine.should_drop(1000.0));
        assert!(engine.should_drop(5000.0));

        let disabled = engine_with(DetectionConfig {
            auto_block_enabled: false,
            ..Default::default()
        });
        assert!(!disabled.should_drop(5000.0));
    }
}
