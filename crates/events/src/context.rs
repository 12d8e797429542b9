//! Execution contexts that deliveries are marshalled onto.
//!
//! A subscriber declares the context its callback must run on; the bus only
//! ever *schedules* work there, it never runs callbacks on the publishing
//! thread. Both contexts here are FIFO, which is what gives a single
//! subscriber publish-order delivery.
//!
//! - [`QueueContext`]: jobs wait until the owner drains them (a UI main loop).
//! - [`ThreadContext`]: a dedicated worker thread drains them continuously.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;

use tracing::{debug, error, warn};

/// A unit of work scheduled on a context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere deliveries can run.
///
/// Implementations must run jobs one at a time, in the order `execute` was
/// called, and must not run them inside `execute` itself.
pub trait ExecutionContext: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn execute(&self, job: Job);
}

/// Context drained explicitly by its owner.
///
/// This is the shape of a UI thread: the owner's loop calls
/// [`QueueContext::run_pending`] and callbacks run there. Draining is
/// single-entry; a callback that tries to drain the queue it is running on (or
/// another thread draining concurrently) gets `0` back, so callbacks never see
/// re-entrant delivery.
#[derive(Default)]
pub struct QueueContext {
    name: String,
    queue: Mutex<VecDeque<Job>>,
    draining: AtomicBool,
}

impl QueueContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run queued jobs until the queue is empty; returns how many ran.
    ///
    /// Jobs scheduled by the jobs themselves are run in the same pass.
    pub fn run_pending(&self) -> usize {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(context = %self.name, "run_pending refused: already draining");
            return 0;
        }

        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it.
            let next = match self.queue.lock() {
                Ok(mut q) => q.pop_front(),
                Err(_) => {
                    error!(context = %self.name, "queue lock poisoned");
                    None
                }
            };
            let Some(job) = next else { break };
            run_job(&self.name, job);
            ran += 1;
        }

        self.draining.store(false, Ordering::Release);
        ran
    }
}

impl ExecutionContext for QueueContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) {
        match self.queue.lock() {
            Ok(mut q) => q.push_back(job),
            Err(_) => error!(context = %self.name, "queue lock poisoned; job dropped"),
        }
    }
}

impl core::fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueContext")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Context backed by a dedicated worker thread.
///
/// A hung job stalls only this thread. A panicking job is caught and logged;
/// the thread carries on with the next job.
pub struct ThreadContext {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadContext {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();

        let worker_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&worker_name, rx))?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        })
    }

    /// Stop accepting jobs, run the ones already queued and join the thread.
    ///
    /// Idempotent. Called from the worker thread itself (e.g. a callback that
    /// drops the last reference) it only closes the queue.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let handle = self.join.lock().ok().and_then(|mut j| j.take());
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(context = %self.name, "worker thread terminated abnormally");
            }
        }
    }
}

impl ExecutionContext for ThreadContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) {
        let sent = match self.sender.lock() {
            Ok(sender) => sender.as_ref().map(|tx| tx.send(job).is_ok()).unwrap_or(false),
            Err(_) => false,
        };
        if !sent {
            warn!(context = %self.name, "context is shut down; job dropped");
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadContext").field("name", &self.name).finish()
    }
}

fn worker_loop(name: &str, rx: mpsc::Receiver<Job>) {
    // Ends once every sender is gone and the queue is drained.
    for job in rx {
        run_job(name, job);
    }
    debug!(context = name, "worker thread stopped");
}

fn run_job(context: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(context, "job panicked; continuing with next job");
    }
}
