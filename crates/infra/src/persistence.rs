//! Asynchronous persistence boundary.
//!
//! Persistence is an external collaborator. The repository hands every
//! published event to a [`PersistenceWorker`], which writes it on its own
//! thread, so the event is usually observed by subscribers *before* it is
//! durable. A failed write is logged and counted; nothing is rolled back in
//! the projection.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use tracing::{debug, warn};

use boxtree_events::{DomainEvent, Event};

/// Durable sink for committed events.
pub trait Persistence: Send + Sync + 'static {
    fn persist(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// In-process persistence used by the runtime, tests and the demo.
///
/// Supports an artificial write latency and injected failures to exercise the
/// optimistic-update path.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    events: Mutex<Vec<DomainEvent>>,
    latency: Duration,
    fail_next: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Make the next `n` writes fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Events written so far, in write order.
    pub fn persisted(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Persistence for InMemoryPersistence {
    fn persist(&self, event: &DomainEvent) -> anyhow::Result<()> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("simulated write failure for {}", event.event_type());
        }

        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Counters for the persistence worker.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PersistenceStats {
    pub enqueued: u64,
    pub persisted: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// Background writer for committed events.
#[derive(Debug)]
pub struct PersistenceWorker {
    sender: Mutex<Option<mpsc::Sender<DomainEvent>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl PersistenceWorker {
    /// Spawn a worker thread writing to `sink`.
    pub fn spawn(name: &str, sink: Arc<dyn Persistence>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<DomainEvent>();
        let counters = Arc::new(Counters::default());

        let worker_counters = counters.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(rx, sink, worker_counters))?;

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
            counters,
        })
    }

    /// Queue an event for writing; never blocks on the write itself.
    pub fn enqueue(&self, event: DomainEvent) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) if tx.send(event).is_ok() => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            _ => warn!("persistence worker stopped; event not persisted"),
        }
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Wait until every enqueued event was written (or failed).
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let s = self.stats();
            if s.persisted + s.failed >= s.enqueued {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Stop accepting events, finish queued writes and join the thread.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handle = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("persistence worker terminated abnormally");
            }
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: mpsc::Receiver<DomainEvent>, sink: Arc<dyn Persistence>, counters: Arc<Counters>) {
    for event in rx {
        match sink.persist(&event) {
            Ok(()) => {
                counters.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %event.kind(), container = %event.container_id(), "event persisted");
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = %event.kind(),
                    container = %event.container_id(),
                    error = %err,
                    "persisting event failed; projection keeps the optimistic state"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_writes_in_enqueue_order() {
        let sink = Arc::new(InMemoryPersistence::new());
        let worker = PersistenceWorker::spawn("persist", sink.clone()).unwrap();

        let events = vec![
            DomainEvent::container_created("c1", "Box"),
            DomainEvent::item_added("c1", "i1", "Thing"),
        ];
        for ev in &events {
            worker.enqueue(ev.clone());
        }

        assert!(worker.settle(Duration::from_secs(5)));
        assert_eq!(sink.persisted(), events);
        assert_eq!(
            worker.stats(),
            PersistenceStats {
                enqueued: 2,
                persisted: 2,
                failed: 0
            }
        );
    }

    #[test]
    fn failures_are_counted_and_do_not_stop_the_worker() {
        let sink = Arc::new(InMemoryPersistence::new());
        sink.fail_next(1);
        let worker = PersistenceWorker::spawn("persist", sink.clone()).unwrap();

        worker.enqueue(DomainEvent::container_created("c1", "Box"));
        worker.enqueue(DomainEvent::container_created("c2", "Crate"));

        assert!(worker.settle(Duration::from_secs(5)));
        assert_eq!(sink.persisted(), vec![DomainEvent::container_created("c2", "Crate")]);
        assert_eq!(worker.stats().failed, 1);
    }

    #[test]
    fn enqueue_after_shutdown_is_not_counted() {
        let worker = PersistenceWorker::spawn("persist", Arc::new(InMemoryPersistence::new())).unwrap();
        worker.shutdown();
        worker.enqueue(DomainEvent::container_removed("c1"));
        assert_eq!(worker.stats().enqueued, 0);
    }
}
