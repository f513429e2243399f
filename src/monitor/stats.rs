//! Engine counters
//!
//! Relaxed atomics, one per cache line so worker cores do not contend.
//! Snapshots read each counter independently; they are not mutually
//! consistent and must not be cross-checked for exact identities.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;
use serde::Serialize;

use crate::core::alert::AttackKind;

pub struct Statistics {
    packets_processed: CachePadded<AtomicU64>,
    packets_allowed: CachePadded<AtomicU64>,
    packets_dropped: CachePadded<AtomicU64>,
    bytes_processed: CachePadded<AtomicU64>,
    threats_detected: CachePadded<AtomicU64>,
    threats_mitigated: CachePadded<AtomicU64>,
    total_blocks: CachePadded<AtomicU64>,
    active_blocks: CachePadded<AtomicU64>,
    block_evictions: CachePadded<AtomicU64>,
    blocks_refused: CachePadded<AtomicU64>,
    queue_full_drops: CachePadded<AtomicU64>,
    attack_counts: [AtomicU64; AttackKind::ALL.len()],
    start_time: Instant,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            packets_processed: CachePadded::new(AtomicU64::new(0)),
            packets_allowed: CachePadded::new(AtomicU64::new(0)),
            packets_dropped: CachePadded::new(AtomicU64::new(0)),
            bytes_processed: CachePadded::new(AtomicU64::new(0)),
            threats_detected: CachePadded::new(AtomicU64::new(0)),
            threats_mitigated: CachePadded::new(AtomicU64::new(0)),
            total_blocks: CachePadded::new(AtomicU64::new(0)),
            active_blocks: CachePadded::new(AtomicU64::new(0)),
            block_evictions: CachePadded::new(AtomicU64::new(0)),
            blocks_refused: CachePadded::new(AtomicU64::new(0)),
            queue_full_drops: CachePadded::new(AtomicU64::new(0)),
            attack_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_processed(&self) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_allowed(&self) {
        self.packets_allowed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_threat(&self, kind: AttackKind) {
        self.threats_detected.fetch_add(1, Ordering::Relaxed);
        self.attack_counts[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mitigated(&self) {
        self.threats_mitigated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_block(&self) {
        self.total_blocks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_block_eviction(&self) {
        self.block_evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_block_refused(&self) {
        self.blocks_refused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queue_full(&self) {
        self.queue_full_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Gauge, set from the cleanup tick and block/unblock paths.
    pub fn set_active_blocks(&self, n: u64) {
        self.active_blocks.store(n, Ordering::Relaxed);
    }

    pub fn packets_processed(&self) -> u64 {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn threats_detected(&self) -> u64 {
        self.threats_detected.load(Ordering::Relaxed)
    }

    pub fn queue_full_drops(&self) -> u64 {
        self.queue_full_drops.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let packets_processed = self.packets_processed.load(Ordering::Relaxed);
        let packets_allowed = self.packets_allowed.load(Ordering::Relaxed);
        let packets_dropped = self.packets_dropped.load(Ordering::Relaxed);
        let bytes_processed = self.bytes_processed.load(Ordering::Relaxed);
        let threats_detected = self.threats_detected.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed();
        let uptime_secs = uptime.as_secs_f64();

        let mut snap = StatsSnapshot {
            packets_processed,
            packets_allowed,
            packets_dropped,
            bytes_processed,
            threats_detected,
            threats_mitigated: self.threats_mitigated.load(Ordering::Relaxed),
            total_blocks: self.total_blocks.load(Ordering::Relaxed),
            active_blocks: self.active_blocks.load(Ordering::Relaxed),
            block_evictions: self.block_evictions.load(Ordering::Relaxed),
            blocks_refused: self.blocks_refused.load(Ordering::Relaxed),
            queue_full_drops: self.queue_full_drops.load(Ordering::Relaxed),
            logs_written: 0,
            logs_dropped: 0,
            attack_counts: std::array::from_fn(|i| self.attack_counts[i].load(Ordering::Relaxed)),
            uptime_secs: uptime.as_secs(),
            packets_per_second: 0.0,
            bytes_per_second: 0.0,
            threat_rate_per_minute: 0.0,
            drop_rate_percent: 0.0,
            allow_rate_percent: 0.0,
        };

        if uptime_secs > 0.0 {
            snap.packets_per_second = packets_processed as f64 / uptime_secs;
            snap.bytes_per_second = bytes_processed as f64 / uptime_secs;
            snap.threat_rate_per_minute = threats_detected as f64 / uptime_secs * 60.0;
        }
        if packets_processed > 0 {
            snap.drop_rate_percent = packets_dropped as f64 * 100.0 / packets_processed as f64;
            snap.allow_rate_percent = packets_allowed as f64 * 100.0 / packets_processed as f64;
        }
        snap
    }
}

/// Point-in-time counter values plus derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub packets_processed: u64,
    pub packets_allowed: u64,
    pub packets_dropped: u64,
    pub bytes_processed: u64,
    pub threats_detected: u64,
    pub threats_mitigated: u64,
    pub total_blocks: u64,
    pub active_blocks: u64,
    pub block_evictions: u64,
    pub blocks_refused: u64,
    pub queue_full_drops: u64,
    pub logs_written: u64,
    pub logs_dropped: u64,
    /// Indexed by `AttackKind::index()`.
    pub attack_counts: [u64; AttackKind::ALL.len()],
    pub uptime_secs: u64,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub threat_rate_per_minute: f64,
    pub drop_rate_percent: f64,
    pub allow_rate_percent: f64,
}

impl StatsSnapshot {
    pub fn attacks_of(&self, kind: AttackKind) -> u64 {
        self.attack_counts[kind.index()]
    }
}
