//! # Worker Scheduler
//!
//! A fixed-delay periodic task runner with a two-phase start. Components
//! register their background workers during wiring; nothing runs until
//! [`Scheduler::start`] is called, after every `before_start` hook has
//! completed. This keeps workers from observing half-constructed state.
//!
//! ## Failure policy
//!
//! Worker bodies are double-wrapped. A worker returning `Err` is an
//! ordinary recoverable condition: it is logged at debug level and the
//! worker runs again after its delay. A panic escaping a worker body is
//! not recoverable: the scheduler logs the CRITICAL ERROR banner and
//! terminates the process with exit code 1. A node that keeps running
//! past an unknown fault will corrupt chain state; failing loudly is the
//! intended behavior.

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

/// Outcome type for a single worker iteration.
pub type WorkerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A periodic worker body. Runs once per tick; the scheduler sleeps for
/// the configured delay between completions (fixed delay, not fixed rate).
pub type Worker = Box<dyn Fn() -> WorkerResult + Send + 'static>;

/// A one-shot hook executed synchronously before any worker starts.
pub type StartHook = Box<dyn FnOnce() -> WorkerResult + Send + 'static>;

struct ScheduledWorker {
    name: &'static str,
    delay: Duration,
    body: Worker,
}

/// Fixed-delay periodic task runner.
///
/// Lifecycle: `new` → `schedule`/`run_before_start` (any number of times)
/// → `start` (exactly once) → `shutdown`. Scheduling after `start` is a
/// programming error and panics.
pub struct Scheduler {
    workers: Mutex<Vec<ScheduledWorker>>,
    before_start: Mutex<Vec<StartHook>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            before_start: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
        }
    }

    /// Registers a periodic worker. The first run happens `delay` after
    /// `start`, and subsequent runs `delay` after each completion.
    pub fn schedule(&self, name: &'static str, delay: Duration, body: Worker) {
        assert!(
            !self.started.load(Ordering::SeqCst),
            "cannot schedule after start"
        );
        self.workers.lock().push(ScheduledWorker { name, delay, body });
    }

    /// Registers a hook that must complete before any worker runs.
    /// Hook failures abort startup.
    pub fn run_before_start(&self, hook: StartHook) {
        assert!(
            !self.started.load(Ordering::SeqCst),
            "cannot add start hooks after start"
        );
        self.before_start.lock().push(hook);
    }

    /// Runs all `before_start` hooks, then spawns one thread per worker.
    pub fn start(&self) -> WorkerResult {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for hook in self.before_start.lock().drain(..) {
            hook()?;
        }

        self.running.store(true, Ordering::SeqCst);

        let mut handles = self.handles.lock();
        for worker in self.workers.lock().drain(..) {
            let running = Arc::clone(&self.running);
            let handle = thread::Builder::new()
                .name(format!("nhz-{}", worker.name))
                .spawn(move || run_worker(worker, running))
                .map_err(|e| format!("failed to spawn worker thread: {}", e))?;
            handles.push(handle);
        }

        info!(workers = handles.len(), "scheduler started");
        Ok(())
    }

    /// Cooperative shutdown: flags every worker to stop and joins them.
    /// Workers notice the flag at their next sleep slice, so this returns
    /// within roughly one slice plus the longest in-flight iteration.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
        info!("scheduler stopped");
    }

    /// Whether `start` has been called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Granularity of the shutdown-aware sleep between worker iterations.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

fn run_worker(worker: ScheduledWorker, running: Arc<AtomicBool>) {
    loop {
        // Sleep first: the initial run happens one delay after start,
        // matching fixed-delay scheduling.
        let mut remaining = worker.delay;
        while !remaining.is_zero() {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        if !running.load(Ordering::SeqCst) {
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| (worker.body)())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(worker = worker.name, error = %e, "worker iteration failed");
            }
            Err(cause) => {
                let detail = panic_message(&cause);
                error!(
                    worker = worker.name,
                    "CRITICAL ERROR. PLEASE REPORT TO THE DEVELOPERS.\n{}",
                    detail
                );
                process::exit(1);
            }
        }
    }
}

fn panic_message(cause: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
