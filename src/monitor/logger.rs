//! Async audit logger
//!
//! Producers push records into a lock-free ring and never block; a single
//! writer thread drains the ring into the sink. Overload drops records (and
//! counts them) rather than stalling the hot path. Alerts ride along on
//! their log records, which is how they leave the engine.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use tracing::{error, warn};

use crate::core::alert::ThreatAlert;
use crate::engine::queue::MpmcQueue;

/// Record severity. Distinct from alert severity: this is about the log
/// stream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warning,
            4 => LogLevel::Error,
            _ => LogLevel::Critical,
        }
    }
}

/// One audit record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub source: &'static str,
    pub message: String,
    pub alert: Option<ThreatAlert>,
}

impl LogRecord {
    pub fn new(level: LogLevel, source: &'static str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            source,
            message: message.into(),
            alert: None,
        }
    }

    /// Render to the line format the sink expects. The alert block is only
    /// appended for records that carry one.
    pub fn render(&self) -> String {
        let mut line = format!(
            "{} [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.as_str(),
            self.source,
            self.message
        );
        if let Some(alert) = &self.alert {
            line.push_str(&format!(
                " | Attack: {} | Severity: {} | Source: {} | Confidence: {:.2}%",
                alert.attack,
                alert.severity,
                alert.src_addr,
                alert.confidence * 100.0
            ));
        }
        line
    }
}

/// How many consecutive write failures before the sink is abandoned.
const SINK_MAX_RETRIES: u32 = 3;
/// Backoff base between retries.
const SINK_RETRY_BACKOFF: Duration = Duration::from_millis(10);
/// Writer sleep when the ring is empty.
const WRITER_IDLE_SLEEP: Duration = Duration::from_millis(5);

struct LoggerShared {
    ring: MpmcQueue<LogRecord>,
    running: AtomicBool,
    min_level: AtomicU8,
    console_echo: AtomicBool,
    sink: Mutex<Option<Box<dyn Write + Send>>>,
    logs_written: CachePadded<AtomicU64>,
    logs_dropped: CachePadded<AtomicU64>,
}

impl LoggerShared {
    /// Write one record, retrying with backoff. A sink that keeps failing is
    /// disabled so the writer cannot wedge behind it.
    fn write_record(&self, record: &LogRecord) {
        let line = record.render();

        if self.console_echo.load(Ordering::Relaxed) {
            println!("{line}");
        }

        let mut sink = self.sink.lock();
        let Some(writer) = sink.as_mut() else {
            // Sink already disabled; the record still counts as handled so
            // shutdown can drain.
            return;
        };

        for attempt in 0..SINK_MAX_RETRIES {
            match writeln!(writer, "{line}").and_then(|_| writer.flush()) {
                Ok(()) => {
                    self.logs_written.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "log sink write failed");
                    std::thread::sleep(SINK_RETRY_BACKOFF * (attempt + 1));
                }
            }
        }
        error!("log sink failed persistently, disabling");
        *sink = None;
    }
}

/// Lock-free-ring logger with a single writer task.
pub struct AsyncLogger {
    shared: Arc<LoggerShared>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLogger {
    /// Ring capacity must be a power of two (validated by the engine
    /// configuration).
    pub fn new(capacity: usize, sink: Box<dyn Write + Send>) -> Self {
        Self {
            shared: Arc::new(LoggerShared {
                ring: MpmcQueue::with_capacity(capacity),
                running: AtomicBool::new(false),
                min_level: AtomicU8::new(LogLevel::Info as u8),
                console_echo: AtomicBool::new(false),
                sink: Mutex::new(Some(sink)),
                logs_written: CachePadded::new(AtomicU64::new(0)),
                logs_dropped: CachePadded::new(AtomicU64::new(0)),
            }),
            writer: Mutex::new(None),
        }
    }

    /// Open (append) a file sink.
    pub fn to_file(capacity: usize, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(capacity, Box::new(file)))
    }

    pub fn set_min_level(&self, level: LogLevel) {
        self.shared.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn set_console_echo(&self, enabled: bool) {
        self.shared.console_echo.store(enabled, Ordering::Relaxed);
    }

    /// Spawn the writer thread. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("sentry-log".into())
            .spawn(move || loop {
                match shared.ring.try_pop() {
                    Some(record) => shared.write_record(&record),
                    None => {
                        if !shared.running.load(Ordering::Relaxed) {
                            break;
                        }
                        std::thread::sleep(WRITER_IDLE_SLEEP);
                    }
                }
            });
        match spawned {
            Ok(handle) => *self.writer.lock() = Some(handle),
            Err(e) => {
                error!(error = %e, "failed to spawn log writer");
                self.shared.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stop the writer and drain whatever is still queued. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
        // The writer exits on empty; anything pushed during teardown is
        // flushed here.
        while let Some(record) = self.shared.ring.try_pop() {
            self.shared.write_record(&record);
        }
    }

    /// Non-blocking enqueue. A full ring drops the record and counts it.
    pub fn log(&self, record: LogRecord) {
        if (record.level as u8) < self.shared.min_level.load(Ordering::Relaxed) {
            return;
        }
        if self.shared.ring.try_push(record).is_err() {
            self.shared.logs_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn debug(&self, source: &'static str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Debug, source, message));
    }

    pub fn info(&self, source: &'static str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Info, source, message));
    }

    pub fn warning(&self, source: &'static str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Warning, source, message));
    }

    pub fn error(&self, source: &'static str, message: impl Into<String>) {
        self.log(LogRecord::new(LogLevel::Error, source, message));
    }

    /// Critical records carry the alert that raised them.
    pub fn critical(&self, source: &'static str, message: impl Into<String>, alert: ThreatAlert) {
        let mut record = LogRecord::new(LogLevel::Critical, source, message);
        record.alert = Some(alert);
        self.log(record);
    }

    pub fn logs_written(&self) -> u64 {
        self.shared.logs_written.load(Ordering::Relaxed)
    }

    pub fn logs_dropped(&self) -> u64 {
        self.shared.logs_dropped.load(Ordering::Relaxed)
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.shared.min_level.load(Ordering::Relaxed))
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
