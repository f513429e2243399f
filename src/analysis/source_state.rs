//! Per-source sliding-window counters
//!
//! Each source gets rolling packet/byte/write/read/exception counters and a
//! bounded set of recently targeted destination ports. Windows use a
//! two-bucket approximation: the current bucket plus the previous one,
//! blended by how far into the current bucket we are.
//!
//! The table is a sharded concurrent map. Growth is bounded two ways:
//! least-recently-seen eviction at `max_sources`, and idle garbage
//! collection from the cleanup tick.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::DetectionConfig;
use crate::core::packet::{FunctionKind, PacketMetadata};

/// Two-bucket rolling counter.
#[derive(Debug, Clone)]
struct WindowCounter {
    window: Duration,
    bucket_start: Instant,
    current: u64,
    previous: u64,
}

impl WindowCounter {
    fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            bucket_start: now,
            current: 0,
            previous: 0,
        }
    }

    fn rotate(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.bucket_start);
        if elapsed >= self.window {
            // Two whole windows with no traffic: both buckets are stale.
            self.previous = if elapsed >= self.window * 2 {
                0
            } else {
                self.current
            };
            self.current = 0;
            self.bucket_start = now;
        }
    }

    fn add(&mut self, n: u64, now: Instant) {
        self.rotate(now);
        self.current += n;
    }

    /// Interpolated count over one window ending at `now`.
    fn estimate(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.bucket_start);
        if elapsed >= self.window * 2 {
            return 0.0;
        }
        if elapsed >= self.window {
            // Current bucket has aged into "previous" territory.
            let into = elapsed - self.window;
            let remaining = 1.0 - into.as_secs_f64() / self.window.as_secs_f64();
            return self.current as f64 * remaining.max(0.0);
        }
        let remaining = 1.0 - elapsed.as_secs_f64() / self.window.as_secs_f64();
        self.current as f64 + self.previous as f64 * remaining
    }
}

/// Destination ports recently targeted by one source, oldest evicted first.
#[derive(Debug, Clone, Default)]
struct PortSet {
    seen: HashMap<u16, Instant>,
}

impl PortSet {
    fn record(&mut self, port: u16, now: Instant, cap: usize) {
        self.seen.insert(port, now);
        while self.seen.len() > cap {
            if let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(p, _)| *p)
            {
                self.seen.remove(&oldest);
            }
        }
    }

    fn distinct_within(&self, window: Duration, now: Instant) -> usize {
        self.seen
            .values()
            .filter(|at| now.saturating_duration_since(**at) <= window)
            .count()
    }
}

/// Rolling state for one source address.
#[derive(Debug, Clone)]
struct SourceState {
    packets: WindowCounter,
    bytes: WindowCounter,
    writes: WindowCounter,
    reads: WindowCounter,
    exceptions: WindowCounter,
    ports: PortSet,
    last_seen: Instant,
}

impl SourceState {
    fn new(dos_window: Duration, now: Instant) -> Self {
        Self {
            packets: WindowCounter::new(dos_window, now),
            bytes: WindowCounter::new(dos_window, now),
            writes: WindowCounter::new(dos_window, now),
            reads: WindowCounter::new(dos_window, now),
            exceptions: WindowCounter::new(dos_window, now),
            ports: PortSet::default(),
            last_seen: now,
        }
    }
}

/// Point-in-time view of one source, handed to the analyzer so rule
/// evaluation runs without holding the entry lock.
#[derive(Debug, Clone, Copy)]
pub struct SourceSnapshot {
    pub packet_rate: f64,
    pub byte_rate: f64,
    pub distinct_ports: usize,
    pub writes: f64,
    pub reads: f64,
    pub exceptions: f64,
}

/// Concurrent per-source table.
pub struct SourceTable {
    sources: DashMap<Ipv4Addr, SourceState>,
    dos_window: Duration,
    port_scan_window: Duration,
    port_cap: usize,
    max_sources: usize,
    idle_timeout: Duration,
    evictions: AtomicU64,
}

impl SourceTable {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            sources: DashMap::new(),
            dos_window: config.dos_window,
            port_scan_window: config.port_scan_window,
            port_cap: config.port_scan_threshold as usize * 2,
            max_sources: config.max_sources(),
            idle_timeout: config.source_idle_timeout(),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fold one packet into its source's state and return the updated view.
    pub fn update(&self, meta: &PacketMetadata, now: Instant) -> SourceSnapshot {
        if !self.sources.contains_key(&meta.src_addr) && self.sources.len() >= self.max_sources {
            self.evict_least_recent();
        }

        let mut entry = self
            .sources
            .entry(meta.src_addr)
            .or_insert_with(|| SourceState::new(self.dos_window, now));
        let state = entry.value_mut();

        state.packets.add(1, now);
        state.bytes.add(meta.packet_size as u64, now);
        state.ports.record(meta.dst_port, now, self.port_cap);
        match meta.function() {
            FunctionKind::Write => state.writes.add(1, now),
            FunctionKind::Read => state.reads.add(1, now),
            _ => {}
        }
        if meta.is_malformed || meta.is_exception_response() {
            state.exceptions.add(1, now);
        }
        state.last_seen = now;

        SourceSnapshot {
            packet_rate: state.packets.estimate(now),
            byte_rate: state.bytes.estimate(now),
            distinct_ports: state.ports.distinct_within(self.port_scan_window, now),
            writes: state.writes.estimate(now),
            reads: state.reads.estimate(now),
            exceptions: state.exceptions.estimate(now),
        }
    }

    /// Current packet rate for a source without touching its state. Feeds
    /// the pre-analysis drop gate.
    pub fn packet_rate(&self, addr: Ipv4Addr, now: Instant) -> f64 {
        self.sources
            .get(&addr)
            .map(|s| s.packets.estimate(now))
            .unwrap_or(0.0)
    }

    /// Drop sources idle past the timeout. Returns how many were removed.
    pub fn gc(&self, now: Instant) -> usize {
        let before = self.sources.len();
        let timeout = self.idle_timeout;
        self.sources
            .retain(|_, s| now.saturating_duration_since(s.last_seen) < timeout);
        before - self.sources.len()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Rough resident size for the memory estimate.
    pub fn approx_bytes(&self) -> usize {
        self.sources.len() * std::mem::size_of::<(Ipv4Addr, SourceState)>()
    }

    fn evict_least_recent(&self) {
        let victim = self
            .sources
            .iter()
            .min_by_key(|e| e.value().last_seen)
            .map(|e| *e.key());
        if let Some(victim) = victim {
            self.sources.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{PacketInput, ProtocolKind};

    fn meta(src: Ipv4Addr, dst_port: u16, size: usize) -> PacketMetadata {
        let input = PacketInput::new(
            vec![0u8; size],
            src,
            Ipv4Addr::new(192, 168, 1, 100),
            49152,
            dst_port,
        );
        PacketMetadata::minimal(&input)
    }

    fn src(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_counts_accumulate_within_window() {
        let table = SourceTable::new(&DetectionConfig::default());
        let now = Instant::now();
        let mut snap = None;
        for _ in 0..10 {
            snap = Some(table.update(&meta(src(1), 502, 100), now));
        }
        let snap = snap.unwrap();
        assert!((snap.packet_rate - 10.0).abs() < 1e-6);
        assert!((snap.byte_rate - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_rotation_decays_counts() {
        let config = DetectionConfig::default();
        let table = SourceTable::new(&config);
        let t0 = Instant::now();
        for _ in 0..100 {
            table.update(&meta(src(2), 502, 10), t0);
        }
        // One window later the old bucket still contributes, scaled down.
        let t1 = t0 + config.dos_window + Duration::from_millis(1);
        let snap = table.update(&meta(src(2), 502, 10), t1);
        assert!(snap.packet_rate <= 101.0);
        assert!(snap.packet_rate > 50.0);
        // Two windows of silence wipe everything.
        let t2 = t1 + config.dos_window * 3;
        assert_eq!(table.packet_rate(src(2), t2), 0.0);
    }

    #[test]
    fn test_distinct_ports_counted_within_window() {
        let table = SourceTable::new(&DetectionConfig::default());
        let now = Instant::now();
        let mut snap = None;
        for port in 500..510 {
            snap = Some(table.update(&meta(src(3), port, 64), now));
        }
        assert_eq!(snap.unwrap().distinct_ports, 10);
        // Re-hitting the same port adds nothing.
        let snap = table.update(&meta(src(3), 505, 64), now);
        assert_eq!(snap.distinct_ports, 10);
    }

    #[test]
    fn test_port_set_is_bounded() {
        let config = DetectionConfig {
            port_scan_threshold: 10,
            ..Default::default()
        };
        let table = SourceTable::new(&config);
        let now = Instant::now();
        let mut snap = None;
        for port in 1000..1100 {
            snap = Some(table.update(&meta(src(4), port, 64), now));
        }
        // Bounded at threshold * 2.
        assert_eq!(snap.unwrap().distinct_ports, 20);
    }

    #[test]
    fn test_packet_rate_query_does_not_create_state() {
        let table = SourceTable::new(&DetectionConfig::default());
        assert_eq!(table.packet_rate(src(5), Instant::now()), 0.0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_gc_reaps_idle_sources() {
        let config = DetectionConfig::default();
        let table = SourceTable::new(&config);
        let now = Instant::now();
        table.update(&meta(src(6), 502, 64), now);
        table.update(&meta(src(7), 502, 64), now + config.source_idle_timeout());
        let removed = table.gc(now + config.source_idle_timeout() + Duration::from_secs(1));
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_max_sources_eviction() {
        let config = DetectionConfig {
            max_concurrent_blocks: 1, // max_sources = 100
            ..Default::default()
        };
        let table = SourceTable::new(&config);
        let base = Instant::now();
        for i in 0..100u32 {
            let m = meta(Ipv4Addr::from(0x0a000000 + i), 502, 64);
            table.update(&m, base + Duration::from_millis(i as u64));
        }
        assert_eq!(table.len(), 100);
        let m = meta(Ipv4Addr::from(0x0b000000u32), 502, 64);
        table.update(&m, base + Duration::from_secs(1));
        assert_eq!(table.len(), 100);
        assert_eq!(table.evictions(), 1);
        // The oldest source is gone.
        assert_eq!(
            table.packet_rate(Ipv4Addr::from(0x0a000000u32), base + Duration::from_secs(1)),
            0.0
        );
    }

    #[test]
    fn test_write_read_and_exception_counters() {
        use crate::protocols::modbus;

        let table = SourceTable::new(&DetectionConfig::default());
        let now = Instant::now();
        let addr = src(8);

        let mut write_meta = meta(addr, 502, 12);
        write_meta.protocol = ProtocolKind::ModbusTcp;
        write_meta.modbus = modbus::parse(&modbus::build_frame(1, 1, 16, 0, 4), 49152).fields;

        let mut read_meta = write_meta.clone();
        read_meta.modbus = modbus::parse(&modbus::build_frame(2, 1, 3, 0, 4), 49152).fields;

        let mut exc_meta = write_meta.clone();
        exc_meta.modbus = modbus::parse(&modbus::build_frame(3, 1, 0x83, 0, 0), 502).fields;

        table.update(&write_meta, now);
        table.update(&write_meta, now);
        table.update(&read_meta, now);
        let snap = table.update(&exc_meta, now);

        assert!((snap.writes - 2.0).abs() < 1e-6);
        assert!((snap.reads - 1.0).abs() < 1e-6);
        assert!((snap.exceptions - 1.0).abs() < 1e-6);
    }
}
