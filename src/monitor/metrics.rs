//! Latency and throughput tracking
//!
//! Hot-path friendly: every write is a relaxed atomic op, min/max use a CAS
//! retry loop, and the histogram buckets are logarithmic so 32 of them
//! cover nanoseconds to seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_utils::CachePadded;
use serde::Serialize;

const HISTOGRAM_BUCKETS: usize = 32;
const THROUGHPUT_SLOTS: u64 = 60;

/// Latency sampler with log2-bucketed histogram.
pub struct LatencyTracker {
    samples: CachePadded<AtomicU64>,
    total_ns: CachePadded<AtomicU64>,
    min_ns: CachePadded<AtomicU64>,
    max_ns: CachePadded<AtomicU64>,
    histogram: [AtomicU64; HISTOGRAM_BUCKETS],
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            samples: CachePadded::new(AtomicU64::new(0)),
            total_ns: CachePadded::new(AtomicU64::new(0)),
            min_ns: CachePadded::new(AtomicU64::new(u64::MAX)),
            max_ns: CachePadded::new(AtomicU64::new(0)),
            histogram: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    #[inline]
    fn bucket_for(ns: u64) -> usize {
        // floor(log2(ns)) / 2, clamped to the table.
        let log2 = 63 - (ns | 1).leading_zeros() as usize;
        (log2 / 2).min(HISTOGRAM_BUCKETS - 1)
    }

    pub fn record(&self, latency: Duration) {
        let ns = latency.as_nanos() as u64;
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);

        let mut current = self.min_ns.load(Ordering::Relaxed);
        while ns < current {
            match self
                .min_ns
                .compare_exchange_weak(current, ns, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut current = self.max_ns.load(Ordering::Relaxed);
        while ns > current {
            match self
                .max_ns
                .compare_exchange_weak(current, ns, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.histogram[Self::bucket_for(ns)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> LatencyStats {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return LatencyStats::default();
        }
        let total = self.total_ns.load(Ordering::Relaxed);
        LatencyStats {
            samples,
            min_ns: self.min_ns.load(Ordering::Relaxed),
            max_ns: self.max_ns.load(Ordering::Relaxed),
            avg_ns: total as f64 / samples as f64,
            avg_us: total as f64 / samples as f64 / 1_000.0,
        }
    }

    /// Histogram-derived quantile estimate. 0.0 and 1.0 map to the exact
    /// tracked min/max; anything between resolves to a bucket upper bound.
    pub fn quantile(&self, q: f64) -> u64 {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        if q <= 0.0 {
            return self.min_ns.load(Ordering::Relaxed);
        }
        if q >= 1.0 {
            return self.max_ns.load(Ordering::Relaxed);
        }
        let target = (samples as f64 * q).ceil() as u64;
        let mut seen = 0u64;
        for (i, bucket) in self.histogram.iter().enumerate() {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= target {
                return 1u64 << ((i + 1) * 2).min(63);
            }
        }
        self.max_ns.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.samples.store(0, Ordering::Relaxed);
        self.total_ns.store(0, Ordering::Relaxed);
        self.min_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
        for bucket in &self.histogram {
            bucket.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStats {
    pub samples: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub avg_ns: f64,
    pub avg_us: f64,
}

struct ThroughputSlot {
    packets: AtomicU64,
    bytes: AtomicU64,
    second: AtomicU64,
}

/// Packets/bytes per second over a 60-slot ring of wall-clock seconds.
pub struct ThroughputTracker {
    slots: [ThroughputSlot; THROUGHPUT_SLOTS as usize],
}

impl Default for ThroughputTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ThroughputSlot {
                packets: AtomicU64::new(0),
                bytes: AtomicU64::new(0),
                second: AtomicU64::new(0),
            }),
        }
    }

    fn epoch_second() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn record(&self, bytes: u64) {
        let now_sec = Self::epoch_second();
        let slot = &self.slots[(now_sec % THROUGHPUT_SLOTS) as usize];

        // First writer landing in a new second resets the slot.
        let stamped = slot.second.load(Ordering::Relaxed);
        if stamped != now_sec
            && slot
                .second
                .compare_exchange(stamped, now_sec, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            slot.packets.store(0, Ordering::Relaxed);
            slot.bytes.store(0, Ordering::Relaxed);
        }

        slot.packets.fetch_add(1, Ordering::Relaxed);
        slot.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn stats(&self, window_sec: u64) -> ThroughputStats {
        let now_sec = Self::epoch_second();
        let window = window_sec.min(THROUGHPUT_SLOTS);

        let mut packets = 0u64;
        let mut bytes = 0u64;
        let mut valid = 0u64;
        for i in 0..window {
            let slot = &self.slots[((now_sec.wrapping_sub(i)) % THROUGHPUT_SLOTS) as usize];
            let stamped = slot.second.load(Ordering::Relaxed);
            if stamped > now_sec.saturating_sub(window) {
                packets += slot.packets.load(Ordering::Relaxed);
                bytes += slot.bytes.load(Ordering::Relaxed);
                valid += 1;
            }
        }

        if valid == 0 {
            return ThroughputStats::default();
        }
        let bytes_per_sec = bytes as f64 / valid as f64;
        ThroughputStats {
            packets_per_sec: packets as f64 / valid as f64,
            bytes_per_sec,
            mbps: bytes_per_sec * 8.0 / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ThroughputStats {
    pub packets_per_sec: f64,
    pub bytes_per_sec: f64,
    pub mbps: f64,
}

/// The engine's tracker set.
#[derive(Default)]
pub struct MetricsManager {
    packet_latency: LatencyTracker,
    analysis_latency: LatencyTracker,
    throughput: ThroughputTracker,
}

impl MetricsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_latency(&self) -> &LatencyTracker {
        &self.packet_latency
    }

    pub fn analysis_latency(&self) -> &LatencyTracker {
        &self.analysis_latency
    }

    pub fn throughput(&self) -> &ThroughputTracker {
        &self.throughput
    }

    pub fn reset(&self) {
        self.packet_latency.reset();
        self.analysis_latency.reset();
    }
}

/// Telemetry view combining both latency trackers, throughput, and the
/// engine's memory estimate.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    pub packet_latency: LatencyStats,
    pub analysis_latency: LatencyStats,
    pub throughput: ThroughputStats,
    pub memory_estimate_bytes: u64,
}
