//! Decision engine
//!
//! The hot path and everything around it: the short-circuit pipeline over
//! the address caches, the mitigation table, the parser and the analyzer;
//! the ingestion queues and worker pool; the cleanup and monitor loops; and
//! the producer, admin, and telemetry surfaces.
//!
//! ```text
//! submit ──▶ MPMC queue ──▶ workers ──▶ process()
//!                                         │ whitelist cache ─▶ allow
//!                                         │ blocked cache ───▶ drop
//!                                         │ parse ─▶ rate gate ─▶ analyze
//!                                         ▼
//!                                  mitigation policy ──▶ log ring ──▶ sink
//! ```

pub mod queue;
mod workers;

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::analysis::BehavioralAnalyzer;
use crate::config::DetectionConfig;
use crate::core::alert::AttackKind;
use crate::core::packet::{Decision, PacketInput, PacketMetadata, ProtocolKind};
use crate::error::{Result, SentryError};
use crate::mitigation::{BlockRecord, MitigationAction, MitigationEngine, RebuildableBloom};
use crate::monitor::metrics::MetricsSnapshot;
use crate::monitor::{AsyncLogger, MetricsManager, Statistics, StatsSnapshot};
use crate::protocols::modbus;

use queue::MpmcQueue;
use workers::WorkerPool;

/// Largest batch accepted by `submit_batch`.
pub const MAX_BATCH: usize = 64;

/// Batch queue capacity (batches, not jobs).
const BATCH_QUEUE_CAPACITY: usize = 512;

/// Blocked/whitelist cache rebuild trigger: above this fill ratio the
/// false-positive rate of a 3-probe filter degrades past usefulness.
const BLOOM_REBUILD_FILL: f64 = 0.5;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Constructed,
    Running,
    Stopped,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EngineState::Constructed,
            1 => EngineState::Running,
            _ => EngineState::Stopped,
        }
    }
}

/// Result slot a worker publishes into once a queued packet is decided.
#[derive(Debug, Default)]
pub struct JobOutcome {
    processed: AtomicBool,
    allowed: AtomicBool,
}

impl JobOutcome {
    fn publish(&self, decision: Decision) {
        self.allowed.store(decision.is_allowed(), Ordering::Release);
        self.processed.store(true, Ordering::Release);
    }
}

/// Producer-side view of a submitted packet.
#[derive(Debug, Clone)]
pub struct JobHandle {
    outcome: Arc<JobOutcome>,
}

impl JobHandle {
    /// The decision, once a worker has published it.
    pub fn decision(&self) -> Option<Decision> {
        if !self.outcome.processed.load(Ordering::Acquire) {
            return None;
        }
        Some(if self.outcome.allowed.load(Ordering::Acquire) {
            Decision::Allow
        } else {
            Decision::Drop
        })
    }

    /// Spin-wait for the decision. Test and shutdown helper, not a hot-path
    /// API.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Decision> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(decision) = self.decision() {
                return Some(decision);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// A packet queued for a worker.
pub(crate) struct PacketJob {
    pub input: PacketInput,
    pub outcome: Arc<JobOutcome>,
}

impl PacketJob {
    fn new(input: PacketInput) -> (Self, JobHandle) {
        let outcome = Arc::new(JobOutcome::default());
        let handle = JobHandle {
            outcome: outcome.clone(),
        };
        (Self { input, outcome }, handle)
    }
}

/// Up to [`MAX_BATCH`] jobs submitted together. Order is preserved inside a
/// batch; batches may be reordered against each other.
pub(crate) struct JobBatch {
    jobs: Vec<PacketJob>,
}

impl JobBatch {
    pub(crate) fn into_jobs(self) -> Vec<PacketJob> {
        self.jobs
    }
}

/// Outcome of `submit`.
#[derive(Debug)]
pub enum SubmitResult {
    Submitted(JobHandle),
    /// The ingestion queue was full; the packet was counted and discarded.
    QueueFull,
    /// The engine is not running.
    Stopped,
}

/// Outcome of `submit_batch`.
#[derive(Debug)]
pub enum BatchSubmitResult {
    Submitted(Vec<JobHandle>),
    /// More than [`MAX_BATCH`] inputs.
    TooLarge,
    /// The batch queue was full; the whole batch was counted and discarded.
    QueueFull,
    /// The engine is not running.
    Stopped,
}

/// Everything the workers and background loops share.
pub(crate) struct EngineCore {
    pub config: Arc<DetectionConfig>,
    pub analyzer: BehavioralAnalyzer,
    pub mitigation: MitigationEngine,
    pub whitelist_cache: RebuildableBloom,
    pub blocked_cache: RebuildableBloom,
    pub logger: AsyncLogger,
    pub stats: Statistics,
    pub metrics: MetricsManager,
    pub queue: MpmcQueue<PacketJob>,
    pub batch_queue: MpmcQueue<JobBatch>,
    pub running: AtomicBool,
    pub error_flag: AtomicBool,
}

impl EngineCore {
    /// The hot path. Order matters: the cheap probabilistic checks run
    /// before any parsing, and parsing before any state update.
    pub fn process(&self, input: &PacketInput) -> Decision {
        let started = Instant::now();
        let now = input.received_at;
        let src = input.src_addr;
        let size = input.payload.len() as u64;

        self.stats.record_processed();

        // Whitelisted sources bypass everything. The cache can produce
        // false positives, so confirm against the authoritative set.
        if self.whitelist_cache.may_contain(src) && self.mitigation.is_whitelisted(src) {
            self.stats.record_allowed();
            self.stats.record_bytes(size);
            self.metrics.throughput().record(size);
            return Decision::Allow;
        }

        // Already-blocked sources drop without parsing. Same double-check.
        if self.blocked_cache.may_contain(src) && self.mitigation.is_blocked(src, now) {
            self.stats.record_dropped();
            self.metrics.packet_latency().record(started.elapsed());
            return Decision::Drop;
        }

        let meta = self.build_metadata(input);

        // A source already past the flood threshold is not worth analyzing.
        let rate = self.analyzer.sources().packet_rate(src, now);
        if self.mitigation.should_drop(rate) {
            self.stats.record_dropped();
            self.metrics.packet_latency().record(started.elapsed());
            return Decision::Drop;
        }

        let analysis_started = Instant::now();
        let mut alerts = self.analyzer.analyze(&meta, now);
        self.metrics
            .analysis_latency()
            .record(analysis_started.elapsed());

        let mut drop = false;
        for alert in alerts.iter_mut() {
            self.stats.record_threat(alert.attack);

            let (action, outcome) = self.mitigation.mitigate(alert, now);
            match action {
                MitigationAction::BlockSource => {
                    alert.auto_mitigated = true;
                    drop = true;
                    self.stats.record_mitigated();
                    if outcome.inserted {
                        self.stats.record_block();
                        self.blocked_cache.add(src);
                    }
                    if outcome.evicted {
                        self.stats.record_block_eviction();
                    }
                    if outcome.refused {
                        self.stats.record_block_refused();
                    }
                    self.stats
                        .set_active_blocks(self.mitigation.active_blocks(now) as u64);
                    self.logger.warning(
                        "Mitigation",
                        format!("Blocked {} after {}", src, alert.attack),
                    );
                }
                MitigationAction::DropPacket => {
                    alert.auto_mitigated = true;
                    drop = true;
                    self.stats.record_mitigated();
                }
                MitigationAction::LogOnly => {}
            }

            self.logger
                .critical("ThreatDetector", alert.description.clone(), alert.clone());
        }

        if drop {
            self.stats.record_dropped();
        } else {
            self.stats.record_allowed();
            self.stats.record_bytes(size);
            self.metrics.throughput().record(size);
        }
        self.metrics.packet_latency().record(started.elapsed());

        if drop {
            Decision::Drop
        } else {
            Decision::Allow
        }
    }

    /// Derive metadata. Full parsing only on monitored Modbus traffic;
    /// other monitored ports get a protocol tag, everything else passes
    /// with minimal metadata.
    fn build_metadata(&self, input: &PacketInput) -> PacketMetadata {
        let monitored = self.config.monitored_ports.contains(&input.src_port)
            || self.config.monitored_ports.contains(&input.dst_port);
        if !monitored {
            return PacketMetadata::minimal(input);
        }

        let mut meta = PacketMetadata::minimal(input);
        meta.protocol = ProtocolKind::from_port(input.src_port, input.dst_port);
        if meta.protocol == ProtocolKind::ModbusTcp {
            let parsed = modbus::parse(&input.payload, input.src_port);
            meta.is_malformed = parsed.malformed;
            meta.modbus = parsed.fields;
        }
        meta
    }

    /// One cleanup pass: expire blocks, reap idle sources, rebuild over-full
    /// address caches from authoritative state.
    fn cleanup_pass(&self, now: Instant) {
        let expired = self.mitigation.cleanup(now);
        let reaped = self.analyzer.sources().gc(now);
        self.stats
            .set_active_blocks(self.mitigation.active_blocks(now) as u64);

        // Rebuilds swap in a complete replacement filter; a worker racing
        // the rebuild still sees every active block.
        if self.blocked_cache.fill_ratio() > BLOOM_REBUILD_FILL {
            self.blocked_cache.rebuild(|fresh| {
                self.mitigation.for_each_blocked(now, |addr| fresh.add(addr));
            });
        }
        if self.whitelist_cache.fill_ratio() > BLOOM_REBUILD_FILL {
            self.whitelist_cache.rebuild(|fresh| {
                self.mitigation.for_each_whitelisted(|addr| fresh.add(addr));
            });
        }

        if expired > 0 || reaped > 0 {
            self.logger.debug(
                "Cleanup",
                format!("{expired} blocks expired, {reaped} idle sources reaped"),
            );
        }
    }

    fn memory_estimate(&self) -> u64 {
        let sources = self.analyzer.sources().approx_bytes();
        let blocks = self.mitigation.approx_bytes();
        let queues = self.queue.capacity() * std::mem::size_of::<PacketJob>()
            + self.batch_queue.capacity() * std::mem::size_of::<JobBatch>();
        // Two double-buffered filter pairs.
        let blooms = 4 * 8192 / 8;
        (sources + blocks + queues + blooms) as u64
    }

    fn stats_summary(&self) -> String {
        let stats = self.stats.snapshot();
        let latency = self.metrics.packet_latency().stats();
        format!(
            "{} pkts ({:.1} pps) | {} threats ({:.2}/min) | latency avg {:.2} us | {} active blocks",
            stats.packets_processed,
            stats.packets_per_second,
            stats.threats_detected,
            stats.threat_rate_per_minute,
            latency.avg_us,
            stats.active_blocks
        )
    }
}

/// Sleep in short slices so a stopping engine never waits out a full tick.
fn interruptible_sleep(running: &AtomicBool, duration: Duration) {
    let slice = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < duration && running.load(Ordering::Relaxed) {
        std::thread::sleep(slice.min(duration - slept));
        slept += slice;
    }
}

/// The intrusion detection and prevention engine.
///
/// Owns every piece of state; multiple engines can coexist in one process.
pub struct Sentry {
    core: Arc<EngineCore>,
    state: AtomicU8,
    workers: Option<WorkerPool>,
    cleanup_thread: Option<JoinHandle<()>>,
    monitor_thread: Option<JoinHandle<()>>,
}

impl Sentry {
    /// Build an engine logging to the given sink. Fails on invalid
    /// configuration.
    pub fn with_sink(config: DetectionConfig, sink: Box<dyn Write + Send>) -> Result<Self> {
        config.validate().map_err(SentryError::Config)?;
        let config = Arc::new(config);

        let logger = AsyncLogger::new(config.log_queue_capacity, sink);
        logger.start();

        let whitelist_cache = RebuildableBloom::new();
        for addr in &config.whitelisted_addresses {
            whitelist_cache.add(*addr);
        }

        let core = Arc::new(EngineCore {
            analyzer: BehavioralAnalyzer::new(config.clone()),
            mitigation: MitigationEngine::new(config.clone()),
            whitelist_cache,
            blocked_cache: RebuildableBloom::new(),
            logger,
            stats: Statistics::new(),
            metrics: MetricsManager::new(),
            queue: MpmcQueue::with_capacity(config.packet_queue_capacity),
            batch_queue: MpmcQueue::with_capacity(BATCH_QUEUE_CAPACITY),
            running: AtomicBool::new(false),
            error_flag: AtomicBool::new(false),
            config,
        });

        core.logger.info("Engine", "initialized");
        Ok(Self {
            core,
            state: AtomicU8::new(EngineState::Constructed as u8),
            workers: None,
            cleanup_thread: None,
            monitor_thread: None,
        })
    }

    /// Build an engine logging to a file (append).
    pub fn new(config: DetectionConfig, log_path: impl AsRef<Path>) -> Result<Self> {
        config.validate().map_err(SentryError::Config)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        Self::with_sink(config, Box::new(file))
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// True once a worker panicked with supervision disabled.
    pub fn has_failed(&self) -> bool {
        self.core.error_flag.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.core.config
    }

    /// The audit logger, for level and echo control.
    pub fn logger(&self) -> &AsyncLogger {
        &self.core.logger
    }

    /// Spawn workers and background loops. Idempotent.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            warn!("engine already running");
            return Ok(());
        }

        self.core.logger.start();
        self.core.running.store(true, Ordering::SeqCst);
        self.core.error_flag.store(false, Ordering::SeqCst);

        self.workers = Some(WorkerPool::spawn(
            self.core.clone(),
            self.core.config.worker_count,
        )?);

        let cleanup_core = self.core.clone();
        self.cleanup_thread = Some(
            std::thread::Builder::new()
                .name("sentry-cleanup".into())
                .spawn(move || loop {
                    interruptible_sleep(&cleanup_core.running, CLEANUP_INTERVAL);
                    if !cleanup_core.running.load(Ordering::Relaxed) {
                        break;
                    }
                    cleanup_core.cleanup_pass(Instant::now());
                })?,
        );

        let monitor_core = self.core.clone();
        self.monitor_thread = Some(
            std::thread::Builder::new()
                .name("sentry-monitor".into())
                .spawn(move || loop {
                    interruptible_sleep(&monitor_core.running, MONITOR_INTERVAL);
                    if !monitor_core.running.load(Ordering::Relaxed) {
                        break;
                    }
                    let summary = monitor_core.stats_summary();
                    monitor_core.logger.info("Monitor", summary);
                })?,
        );

        self.state.store(EngineState::Running as u8, Ordering::SeqCst);
        self.core.logger.info("Engine", "started");
        info!(
            workers = self.core.config.worker_count,
            "sentry engine running"
        );
        Ok(())
    }

    /// Stop workers (draining the queue unless configured otherwise), join
    /// background loops, and flush the logger. Idempotent.
    pub fn stop(&mut self) -> anyhow::Result<()> {
        if self.state() != EngineState::Running {
            return Ok(());
        }

        self.core.logger.info("Engine", "stopping");
        self.core.running.store(false, Ordering::SeqCst);

        if let Some(pool) = self.workers.take() {
            pool.join();
        }
        if let Some(handle) = self.cleanup_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.monitor_thread.take() {
            let _ = handle.join();
        }

        self.state.store(EngineState::Stopped as u8, Ordering::SeqCst);
        self.core.logger.info("Engine", "stopped");
        self.core.logger.stop();
        info!("sentry engine stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Producer surface
    // ------------------------------------------------------------------

    /// Hand a packet to the worker pool. Never blocks.
    pub fn submit(&self, input: PacketInput) -> SubmitResult {
        if !self.is_running() {
            return SubmitResult::Stopped;
        }
        let (job, handle) = PacketJob::new(input);
        match self.core.queue.try_push(job) {
            Ok(()) => SubmitResult::Submitted(handle),
            Err(_) => {
                self.core.stats.record_queue_full();
                SubmitResult::QueueFull
            }
        }
    }

    /// Hand up to [`MAX_BATCH`] packets to the worker pool as one unit.
    pub fn submit_batch(&self, inputs: Vec<PacketInput>) -> BatchSubmitResult {
        if inputs.len() > MAX_BATCH {
            return BatchSubmitResult::TooLarge;
        }
        if !self.is_running() {
            return BatchSubmitResult::Stopped;
        }
        let mut jobs = Vec::with_capacity(inputs.len());
        let mut handles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let (job, handle) = PacketJob::new(input);
            jobs.push(job);
            handles.push(handle);
        }
        match self.core.batch_queue.try_push(JobBatch { jobs }) {
            Ok(()) => BatchSubmitResult::Submitted(handles),
            Err(batch) => {
                for _ in batch.jobs {
                    self.core.stats.record_queue_full();
                }
                BatchSubmitResult::QueueFull
            }
        }
    }

    /// Decide a packet inline on the caller's thread, bypassing the queue.
    pub fn process_sync(&self, input: &PacketInput) -> Decision {
        self.core.process(input)
    }

    // ------------------------------------------------------------------
    // Admin surface
    // ------------------------------------------------------------------

    /// Manually block a source for the configured auto-block duration.
    pub fn block(&self, addr: Ipv4Addr, reason: Option<AttackKind>) {
        let now = Instant::now();
        let outcome = self.core.mitigation.block(
            addr,
            reason,
            Some(self.core.config.auto_block_duration),
            now,
        );
        if outcome.inserted {
            self.core.stats.record_block();
        }
        if outcome.evicted {
            self.core.stats.record_block_eviction();
        }
        if outcome.refused {
            self.core.stats.record_block_refused();
        }
        self.core.blocked_cache.add(addr);
        self.core
            .stats
            .set_active_blocks(self.core.mitigation.active_blocks(now) as u64);
        self.core
            .logger
            .warning("Admin", format!("manually blocked {addr}"));
    }

    /// Remove a block. The stale blocked-cache bit is tolerated: the
    /// authoritative table is consulted on every cache hit, and the cache is
    /// rebuilt on the cleanup tick.
    pub fn unblock(&self, addr: Ipv4Addr) -> bool {
        let removed = self.core.mitigation.unblock(addr);
        if removed {
            self.core
                .stats
                .set_active_blocks(self.core.mitigation.active_blocks(Instant::now()) as u64);
            self.core
                .logger
                .info("Admin", format!("manually unblocked {addr}"));
        }
        removed
    }

    pub fn add_whitelist(&self, addr: Ipv4Addr) {
        self.core.mitigation.add_whitelist(addr);
        self.core.whitelist_cache.add(addr);
        self.core
            .logger
            .info("Admin", format!("whitelisted {addr}"));
    }

    pub fn remove_whitelist(&self, addr: Ipv4Addr) -> bool {
        let removed = self.core.mitigation.remove_whitelist(addr);
        if removed {
            self.core
                .logger
                .info("Admin", format!("removed {addr} from whitelist"));
        }
        removed
    }

    /// Run one cleanup pass immediately instead of waiting for the tick.
    pub fn cleanup_now(&self) {
        self.core.cleanup_pass(Instant::now());
    }

    // ------------------------------------------------------------------
    // Telemetry surface
    // ------------------------------------------------------------------

    pub fn statistics_snapshot(&self) -> StatsSnapshot {
        let mut snap = self.core.stats.snapshot();
        snap.logs_written = self.core.logger.logs_written();
        snap.logs_dropped = self.core.logger.logs_dropped();
        snap
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packet_latency: self.core.metrics.packet_latency().stats(),
            analysis_latency: self.core.metrics.analysis_latency().stats(),
            throughput: self.core.metrics.throughput().stats(10),
            memory_estimate_bytes: self.core.memory_estimate(),
        }
    }

    pub fn blocked_list(&self) -> Vec<BlockRecord> {
        self.core.mitigation.snapshot(Instant::now())
    }
}

impl Drop for Sentry {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::PacketInput;
    use crate::protocols::modbus;
    use std::io;

    fn quiet_engine(config: DetectionConfig) -> Sentry {
        Sentry::with_sink(config, Box::new(io::sink())).unwrap()
    }

    fn modbus_read(src: Ipv4Addr) -> PacketInput {
        PacketInput::new(
            modbus::build_frame(1, 1, 3, 100, 10),
            src,
            Ipv4Addr::new(192, 168, 1, 100),
            49152,
            502,
        )
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DetectionConfig {
            packet_queue_capacity: 1000,
            ..Default::default()
        };
        assert!(Sentry::with_sink(config, Box::new(io::sink())).is_err());
    }

    #[test]
    fn test_state_machine() {
        let mut engine = quiet_engine(DetectionConfig::default());
        assert_eq!(engine.state(), EngineState::Constructed);
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        // Idempotent start.
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        // Idempotent stop.
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_submit_before_start_is_rejected() {
        let engine = quiet_engine(DetectionConfig::default());
        let result = engine.submit(modbus_read(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(matches!(result, SubmitResult::Stopped));
    }

    #[test]
    fn test_clean_packet_allowed_inline() {
        let engine = quiet_engine(DetectionConfig::default());
        let decision = engine.process_sync(&modbus_read(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(decision, Decision::Allow);
        let stats = engine.statistics_snapshot();
        assert_eq!(stats.packets_processed, 1);
        assert_eq!(stats.packets_allowed, 1);
        assert_eq!(stats.threats_detected, 0);
    }

    #[test]
    fn test_submitted_packet_gets_decision() {
        let mut engine = quiet_engine(DetectionConfig::default());
        engine.start().unwrap();
        let result = engine.submit(modbus_read(Ipv4Addr::new(192, 168, 1, 10)));
        let SubmitResult::Submitted(handle) = result else {
            panic!("expected submission");
        };
        let decision = handle.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(decision, Decision::Allow);
        engine.stop().unwrap();
    }

    #[test]
    fn test_batch_within_order() {
        let mut engine = quiet_engine(DetectionConfig::default());
        engine.start().unwrap();
        let inputs: Vec<PacketInput> = (0..10)
            .map(|_| modbus_read(Ipv4Addr::new(192, 168, 1, 10)))
            .collect();
        let BatchSubmitResult::Submitted(handles) = engine.submit_batch(inputs) else {
            panic!("expected batch submission");
        };
        for handle in &handles {
            assert_eq!(
                handle.wait_timeout(Duration::from_secs(5)),
                Some(Decision::Allow)
            );
        }
        engine.stop().unwrap();
    }

    #[test]
    fn test_batch_too_large() {
        let engine = quiet_engine(DetectionConfig::default());
        let inputs: Vec<PacketInput> = (0..MAX_BATCH + 1)
            .map(|_| modbus_read(Ipv4Addr::new(192, 168, 1, 10)))
            .collect();
        assert!(matches!(
            engine.submit_batch(inputs),
            BatchSubmitResult::TooLarge
        ));
    }

    #[test]
    fn test_queue_saturation_counts_drops() {
        let config = DetectionConfig {
            packet_queue_capacity: 8,
            ..Default::default()
        };
        // Engine constructed but not started: nothing drains the queue.
        let engine = quiet_engine(config);
        engine.core.running.store(true, Ordering::SeqCst);
        engine
            .state
            .store(EngineState::Running as u8, Ordering::SeqCst);

        let mut full = 0;
        for _ in 0..20 {
            if matches!(
                engine.submit(modbus_read(Ipv4Addr::new(10, 0, 0, 1))),
                SubmitResult::QueueFull
            ) {
                full += 1;
            }
        }
        assert_eq!(full, 12);
        assert_eq!(engine.statistics_snapshot().queue_full_drops, 12);
    }

    #[test]
    fn test_manual_block_and_unblock() {
        let engine = quiet_engine(DetectionConfig::default());
        let addr = Ipv4Addr::new(203, 0, 113, 9);
        engine.block(addr, None);
        assert_eq!(
            engine.process_sync(&modbus_read(addr)),
            Decision::Drop
        );
        assert_eq!(engine.blocked_list().len(), 1);
        assert!(engine.unblock(addr));
        assert_eq!(
            engine.process_sync(&modbus_read(addr)),
            Decision::Allow
        );
        assert!(!engine.unblock(addr));
    }

    #[test]
    fn test_memory_estimate_nonzero() {
        let engine = quiet_engine(DetectionConfig::default());
        engine.process_sync(&modbus_read(Ipv4Addr::new(10, 0, 0, 3)));
        assert!(engine.metrics_snapshot().memory_estimate_bytes > 0);
    }
}
