//! Worker pool
//!
//! Long-lived OS threads pulling jobs off the lock-free queues and running
//! them through the decision engine. Workers are interchangeable: packets
//! from one source may be decided by different workers, so per-source
//! arrival order is not preserved across workers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use super::{EngineCore, PacketJob};

/// Spin this many times on an empty queue before yielding the core.
const IDLE_SPINS: u32 = 64;

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(core: Arc<EngineCore>, count: usize) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let core = core.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sentry-worker-{id}"))
                .spawn(move || worker_loop(core, id))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(core: Arc<EngineCore>, id: usize) {
    debug!(worker = id, "worker started");
    let mut idle_spins = 0u32;
    let drain = core.config.drain_on_stop;

    loop {
        if let Some(job) = core.queue.try_pop() {
            idle_spins = 0;
            if !run_job(&core, job) {
                break;
            }
        } else if let Some(batch) = core.batch_queue.try_pop() {
            idle_spins = 0;
            // Batch elements are decided in order; only batches reorder
            // against each other.
            let mut poisoned = false;
            for job in batch.into_jobs() {
                if !run_job(&core, job) {
                    poisoned = true;
                    break;
                }
            }
            if poisoned {
                break;
            }
        } else {
            if !core.running.load(Ordering::Relaxed) {
                break;
            }
            idle_spins += 1;
            if idle_spins < IDLE_SPINS {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
            continue;
        }

        // Fast exit: skip whatever is still queued.
        if !drain && !core.running.load(Ordering::Relaxed) {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}

/// Decide one job and publish the result. Returns false when the worker
/// must stop (unsupervised panic).
fn run_job(core: &EngineCore, job: PacketJob) -> bool {
    match catch_unwind(AssertUnwindSafe(|| core.process(&job.input))) {
        Ok(decision) => {
            job.outcome.publish(decision);
            true
        }
        Err(_) => {
            if core.config.worker_supervision {
                warn!("worker recovered from panic, continuing");
                core.logger
                    .error("Worker", "panic while processing a packet; worker restarted");
                true
            } else {
                error!("worker panicked with supervision disabled, stopping engine");
                core.error_flag.store(true, Ordering::SeqCst);
                core.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }
}
