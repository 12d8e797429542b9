//! Typed publish/subscribe hub.
//!
//! This module provides the **event bus pattern**: producers publish typed
//! [`DomainEvent`]s, subscribers register a callback for one [`EventKind`] and
//! the execution context the callback must run on.
//!
//! ## Design Philosophy
//!
//! - **Typed at both ends, untyped in between**: `publish` encodes through the
//!   [`CodecRegistry`]; each delivery decodes in the subscriber's context. The
//!   codec is the only component that touches payload keys.
//! - **Routing by kind only**: payload contents are never inspected to decide
//!   who receives an event.
//! - **Fire-and-forget**: `publish` schedules deliveries and returns; it never
//!   runs or waits for a callback.
//! - **Explicit instance**: the bus is constructed by whoever composes the
//!   application and passed around by clone (it is an `Arc` inside). There is
//!   no global bus.
//!
//! ## Delivery Guarantees
//!
//! - A single subscription observes events in the order `publish` was called
//!   (each context is a FIFO queue and scheduling happens in call order).
//! - No ordering across different subscriptions.
//! - Cancelling a subscription prevents every delivery that has not started
//!   yet; a delivery already running completes.
//!
//! ## Error Handling
//!
//! - `subscribe`/`publish` for a kind without a codec: [`BusError::UnknownEventKind`].
//! - `publish` of an event that does not survive encode → decode:
//!   [`BusError::EncodingFailure`], returned to the publisher; nobody is notified.
//! - A payload that fails to decode during delivery (only possible through
//!   [`EventBus::publish_payload`]) is logged, counted and dropped for that
//!   subscription only.
//!
//! ## Thread Safety
//!
//! The subscriber registry is the only shared mutable state. It is guarded by
//! a mutex that is held for registry reads and mutations, never while a
//! callback runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::codec::{CodecRegistry, EventCodec};
use crate::context::ExecutionContext;
use crate::error::BusError;
use crate::event::{DomainEvent, Event, EventKind};
use crate::payload::TransportPayload;
use crate::subscription::{Registration, SubscriptionHandle, SubscriptionId};

/// Point-in-time copy of the bus counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Successful `publish`/`publish_payload` calls.
    pub published: u64,
    /// Deliveries handed to execution contexts.
    pub scheduled: u64,
    /// Callbacks invoked.
    pub delivered: u64,
    /// Deliveries dropped because the payload did not decode.
    pub malformed: u64,
    /// Deliveries skipped because the subscription was cancelled first.
    pub skipped_cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    scheduled: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
    skipped_cancelled: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            skipped_cancelled: self.skipped_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// A live subscription as seen by the registry; the only owner of its context.
struct Subscriber {
    registration: Arc<Registration>,
    context: Arc<dyn ExecutionContext>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<Subscriber>>,
}

pub(crate) struct BusInner {
    codecs: CodecRegistry,
    registry: Mutex<Registry>,
    counters: Arc<Counters>,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry updates are single push/retain calls; a panic elsewhere
        // cannot leave it half-written.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn codec(&self, kind: EventKind) -> Result<Arc<dyn EventCodec>, BusError> {
        self.codecs
            .get(kind)
            .cloned()
            .ok_or(BusError::UnknownEventKind(kind))
    }

    pub(crate) fn unregister(&self, kind: EventKind, id: SubscriptionId) {
        let mut registry = self.registry();
        if let Some(subs) = registry.by_kind.get_mut(&kind) {
            subs.retain(|s| s.registration.id != id);
            if subs.is_empty() {
                registry.by_kind.remove(&kind);
            }
        }
    }

    /// Schedule one delivery per live subscription of `kind`.
    fn dispatch(&self, kind: EventKind, codec: Arc<dyn EventCodec>, payload: TransportPayload) -> usize {
        let targets: Vec<(Arc<Registration>, Arc<dyn ExecutionContext>)> = {
            let registry = self.registry();
            registry
                .by_kind
                .get(&kind)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| s.registration.is_active())
                        .map(|s| (s.registration.clone(), s.context.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        Counters::bump(&self.counters.published);
        let payload = Arc::new(payload);

        for (registration, context) in &targets {
            let delivery = Delivery {
                registration: registration.clone(),
                codec: codec.clone(),
                payload: payload.clone(),
                counters: self.counters.clone(),
            };
            context.execute(Box::new(move || delivery.run()));
            Counters::bump(&self.counters.scheduled);
        }

        trace!(kind = %kind, deliveries = targets.len(), "published");
        targets.len()
    }
}

/// One scheduled callback invocation.
struct Delivery {
    registration: Arc<Registration>,
    codec: Arc<dyn EventCodec>,
    payload: Arc<TransportPayload>,
    counters: Arc<Counters>,
}

impl Delivery {
    fn run(self) {
        let registration = &self.registration;
        let Some(callback) = registration.callback() else {
            Counters::bump(&self.counters.skipped_cancelled);
            return;
        };

        match self.codec.decode(&self.payload) {
            Ok(event) => {
                callback(event);
                Counters::bump(&self.counters.delivered);
            }
            Err(error) => {
                Counters::bump(&self.counters.malformed);
                warn!(
                    kind = %registration.kind,
                    subscription = %registration.id,
                    context = %registration.context_name,
                    %error,
                    payload = %self.payload,
                    "dropping delivery: malformed payload"
                );
            }
        }
    }
}

/// Process-wide typed event bus.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus that knows the kinds in `codecs`.
    pub fn new(codecs: CodecRegistry) -> Self {
        Self {
            inner: Arc::new(BusInner {
                codecs,
                registry: Mutex::new(Registry::default()),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    /// Publish a typed event to every live subscription of its kind.
    ///
    /// Returns the number of deliveries scheduled. The event is encoded and
    /// round-tripped here, so an event the codec cannot faithfully carry is
    /// rejected to the producer instead of reaching subscribers.
    pub fn publish(&self, event: &DomainEvent) -> Result<usize, BusError> {
        let kind = event.kind();
        let codec = self.inner.codec(kind)?;

        let payload = codec
            .encode(event)
            .map_err(|e| BusError::encoding(kind, e.to_string()))?;

        match codec.decode(&payload) {
            Ok(decoded) if decoded == *event => {}
            Ok(decoded) => {
                return Err(BusError::encoding(
                    kind,
                    format!("round trip altered the event: {decoded:?}"),
                ));
            }
            Err(e) => {
                return Err(BusError::encoding(kind, format!("payload does not decode: {e}")));
            }
        }

        Ok(self.inner.dispatch(kind, codec, payload))
    }

    /// Publish an already-encoded payload under `kind`.
    ///
    /// For payloads relayed from an untyped source (e.g. a background sync).
    /// Nothing is validated here; each delivery decodes on its own context and
    /// a malformed payload is dropped per subscription.
    pub fn publish_payload(&self, kind: EventKind, payload: TransportPayload) -> Result<usize, BusError> {
        let codec = self.inner.codec(kind)?;
        Ok(self.inner.dispatch(kind, codec, payload))
    }

    /// Register `callback` for events of `kind`, delivered on `context`.
    ///
    /// Subscribing the same callback twice creates two independent
    /// subscriptions.
    pub fn subscribe<F>(
        &self,
        kind: EventKind,
        context: Arc<dyn ExecutionContext>,
        callback: F,
    ) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(DomainEvent) + Send + Sync + 'static,
    {
        if !self.inner.codecs.contains(kind) {
            return Err(BusError::UnknownEventKind(kind));
        }

        let registration = {
            let mut registry = self.inner.registry();
            registry.next_id += 1;
            let registration = Arc::new(Registration::new(
                SubscriptionId(registry.next_id),
                kind,
                context.name().to_string(),
                Arc::new(callback),
            ));
            registry.by_kind.entry(kind).or_default().push(Subscriber {
                registration: registration.clone(),
                context,
            });
            registration
        };

        debug!(
            subscription = %registration.id,
            kind = %kind,
            context = %registration.context_name,
            "subscribed"
        );
        Ok(SubscriptionHandle::new(Arc::downgrade(&self.inner), registration))
    }

    /// Cancel a subscription; same as [`SubscriptionHandle::cancel`].
    pub fn cancel(&self, handle: &mut SubscriptionHandle) -> bool {
        handle.cancel()
    }

    /// Live subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .registry()
            .by_kind
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Live subscriptions across all kinds.
    pub fn subscriber_total(&self) -> usize {
        self.inner.registry().by_kind.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> BusStats {
        self.inner.counters.snapshot()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(CodecRegistry::default())
    }
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("codecs", &self.inner.codecs)
            .field("subscribers", &self.subscriber_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use crate::codec::{KEY_TITLE, VariantCodec};
    use crate::context::{QueueContext, ThreadContext};
    use crate::event::ContainerCreated;

    fn recorder() -> (Arc<Mutex<Vec<DomainEvent>>>, impl Fn(DomainEvent) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |ev| sink.lock().unwrap().push(ev))
    }

    #[test]
    fn publish_schedules_on_context_and_never_runs_inline() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let _h = bus.subscribe(EventKind::ContainerCreated, ui.clone(), cb).unwrap();

        let event = DomainEvent::container_created("c1", "Box");
        assert_eq!(bus.publish(&event).unwrap(), 1);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(ui.run_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![event]);
    }

    #[test]
    fn routes_by_kind_only() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let _h = bus.subscribe(EventKind::ItemAdded, ui.clone(), cb).unwrap();

        assert_eq!(bus.publish(&DomainEvent::container_created("c1", "Box")).unwrap(), 0);
        assert_eq!(bus.publish(&DomainEvent::item_added("c1", "i1", "Milk")).unwrap(), 1);
        ui.run_pending();

        assert_eq!(*seen.lock().unwrap(), vec![DomainEvent::item_added("c1", "i1", "Milk")]);
    }

    #[test]
    fn single_subscriber_sees_publish_order() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let _h = bus.subscribe(EventKind::ItemAdded, ui.clone(), cb).unwrap();

        let events: Vec<DomainEvent> = (0..50)
            .map(|i| DomainEvent::item_added("c1", format!("i{i}"), format!("Item {i}")))
            .collect();
        for ev in &events {
            bus.publish(ev).unwrap();
        }
        ui.run_pending();

        assert_eq!(*seen.lock().unwrap(), events);
    }

    #[test]
    fn same_callback_twice_yields_two_subscriptions() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let cb = Arc::new(cb);

        let cb1 = cb.clone();
        let cb2 = cb.clone();
        let h1 = bus
            .subscribe(EventKind::ContainerRemoved, ui.clone(), move |ev| cb1(ev))
            .unwrap();
        let h2 = bus
            .subscribe(EventKind::ContainerRemoved, ui.clone(), move |ev| cb2(ev))
            .unwrap();
        assert_ne!(h1.id(), h2.id());
        assert_eq!(bus.subscriber_count(EventKind::ContainerRemoved), 2);

        bus.publish(&DomainEvent::container_removed("c1")).unwrap();
        ui.run_pending();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn cancel_stops_delivery_but_other_subscriptions_continue() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen_a, cb_a) = recorder();
        let (seen_b, cb_b) = recorder();
        let mut a = bus.subscribe(EventKind::ItemAdded, ui.clone(), cb_a).unwrap();
        let _b = bus.subscribe(EventKind::ItemAdded, ui.clone(), cb_b).unwrap();

        bus.publish(&DomainEvent::item_added("c1", "i1", "Milk")).unwrap();
        ui.run_pending();

        assert!(bus.cancel(&mut a));
        assert!(!a.cancel());
        assert!(!a.is_active());
        assert_eq!(bus.subscriber_count(EventKind::ItemAdded), 1);

        bus.publish(&DomainEvent::item_added("c1", "i2", "Eggs")).unwrap();
        ui.run_pending();

        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 2);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        {
            let _scoped = bus.subscribe(EventKind::ContainerCreated, ui.clone(), cb).unwrap();
            assert_eq!(bus.subscriber_total(), 1);
        }
        assert_eq!(bus.subscriber_total(), 0);

        assert_eq!(bus.publish(&DomainEvent::container_created("c1", "Box")).unwrap(), 0);
        ui.run_pending();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_skips_deliveries_not_yet_started() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let mut h = bus.subscribe(EventKind::ContainerCreated, ui.clone(), cb).unwrap();

        bus.publish(&DomainEvent::container_created("c1", "Box")).unwrap();
        h.cancel();
        ui.run_pending();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.stats().skipped_cancelled, 1);
    }

    #[test]
    fn in_flight_delivery_completes_after_cancel() {
        let bus = EventBus::default();
        let worker = Arc::new(ThreadContext::spawn("worker").unwrap());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();
        let release_rx = Mutex::new(release_rx);

        let mut h = bus
            .subscribe(EventKind::ContainerCreated, worker.clone(), move |ev| {
                started_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
                done_tx.send(ev).unwrap();
            })
            .unwrap();

        bus.publish(&DomainEvent::container_created("c1", "Box")).unwrap();
        bus.publish(&DomainEvent::container_created("c2", "Crate")).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(h.cancel());
        release_tx.send(()).unwrap();

        let first = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, DomainEvent::container_created("c1", "Box"));
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn subscribe_to_unregistered_kind_fails() {
        let bus = EventBus::new(CodecRegistry::new().with(VariantCodec::<ContainerCreated>::new()));
        let ui = Arc::new(QueueContext::new("ui"));

        let err = bus.subscribe(EventKind::ItemAdded, ui.clone(), |_| {}).unwrap_err();
        assert_eq!(err, BusError::UnknownEventKind(EventKind::ItemAdded));
        assert!(bus.subscribe(EventKind::ContainerCreated, ui.clone(), |_| {}).is_ok());

        let err = bus.publish(&DomainEvent::item_added("c1", "i1", "Milk")).unwrap_err();
        assert_eq!(err, BusError::UnknownEventKind(EventKind::ItemAdded));
    }

    #[test]
    fn encoding_failure_reaches_publisher_not_subscribers() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let _h = bus.subscribe(EventKind::ItemAdded, ui.clone(), cb).unwrap();

        let err = bus.publish(&DomainEvent::item_added("c1", " ", "Milk")).unwrap_err();
        assert!(matches!(err, BusError::EncodingFailure { kind: EventKind::ItemAdded, .. }));
        assert_eq!(ui.pending(), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.stats().published, 0);
    }

    #[test]
    fn malformed_payload_is_dropped_per_delivery() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let (seen, cb) = recorder();
        let _h = bus.subscribe(EventKind::ContainerCreated, ui.clone(), cb).unwrap();

        let good = DomainEvent::container_created("c1", "Box");
        let mut bad = bus.codecs().encode(&good).unwrap();
        bad.remove(KEY_TITLE);

        assert_eq!(bus.publish_payload(EventKind::ContainerCreated, bad).unwrap(), 1);
        bus.publish(&good).unwrap();
        assert_eq!(ui.run_pending(), 2);

        assert_eq!(*seen.lock().unwrap(), vec![good]);
        let stats = bus.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.published, 2);
    }

    #[test]
    fn concurrent_publishers_keep_per_thread_order() {
        let bus = EventBus::default();
        let worker = Arc::new(ThreadContext::spawn("worker").unwrap());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let _h = bus
            .subscribe(EventKind::ItemAdded, worker.clone(), move |ev| {
                tx.lock().unwrap().send(ev).unwrap();
            })
            .unwrap();

        let publishers: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|prefix| {
                let bus = bus.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        bus.publish(&DomainEvent::item_added(prefix, format!("{i}"), "x"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for p in publishers {
            p.join().unwrap();
        }

        let mut per_source: HashMap<String, Vec<u32>> = HashMap::new();
        for _ in 0..200 {
            let ev = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if let DomainEvent::ItemAdded(e) = ev {
                per_source
                    .entry(e.container_id.to_string())
                    .or_default()
                    .push(e.item_id.as_str().parse().unwrap());
            }
        }
        let expected: Vec<u32> = (0..100).collect();
        assert_eq!(per_source["a"], expected);
        assert_eq!(per_source["b"], expected);
    }

    #[test]
    fn undrained_queue_is_released_with_its_owners() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let captured = Arc::new(());
        let capture = captured.clone();
        let h = bus
            .subscribe(EventKind::ContainerCreated, ui.clone(), move |_| drop(capture.clone()))
            .unwrap();

        bus.publish(&DomainEvent::container_created("c1", "Box")).unwrap();
        assert_eq!(ui.pending(), 1);

        // Cancelling releases the callback even though a delivery is queued.
        drop(h);
        assert_eq!(Arc::strong_count(&captured), 1);

        let weak_ui = Arc::downgrade(&ui);
        drop(bus);
        drop(ui);
        assert!(weak_ui.upgrade().is_none());
    }

    #[test]
    fn dropping_bus_releases_contexts_of_live_subscriptions() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let _h = bus.subscribe(EventKind::ItemAdded, ui.clone(), |_| {}).unwrap();
        bus.publish(&DomainEvent::item_added("c1", "i1", "Milk")).unwrap();

        let weak_ui = Arc::downgrade(&ui);
        drop(bus);
        drop(ui);
        assert!(weak_ui.upgrade().is_none());
    }

    #[test]
    fn subscribe_and_cancel_race_with_publishers() {
        let bus = EventBus::default();
        let stop = Arc::new(AtomicBool::new(false));

        let publishers: Vec<_> = (0..2)
            .map(|p| {
                let bus = bus.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    let mut n = 0u64;
                    while !stop.load(Ordering::Acquire) {
                        bus.publish(&DomainEvent::container_removed(format!("c{p}-{n}")))
                            .unwrap();
                        n += 1;
                    }
                })
            })
            .collect();

        let churners: Vec<_> = (0..4)
            .map(|t| {
                let bus = bus.clone();
                thread::spawn(move || {
                    let ctx = Arc::new(QueueContext::new(format!("churn-{t}")));
                    let late = Arc::new(AtomicUsize::new(0));
                    for _ in 0..200 {
                        let cancelled = Arc::new(AtomicBool::new(false));
                        let flag = cancelled.clone();
                        let late_calls = late.clone();
                        let mut h = bus
                            .subscribe(EventKind::ContainerRemoved, ctx.clone(), move |_| {
                                if flag.load(Ordering::Acquire) {
                                    late_calls.fetch_add(1, Ordering::Relaxed);
                                }
                            })
                            .unwrap();

                        ctx.run_pending();
                        assert!(h.cancel());
                        cancelled.store(true, Ordering::Release);
                        ctx.run_pending();
                    }
                    late.load(Ordering::Relaxed)
                })
            })
            .collect();

        for churner in churners {
            assert_eq!(churner.join().unwrap(), 0, "callback ran after cancel returned");
        }
        stop.store(true, Ordering::Release);
        for p in publishers {
            p.join().unwrap();
        }

        assert_eq!(bus.subscriber_total(), 0);
        assert!(bus.stats().published > 0);
    }

    #[test]
    fn blocked_subscriber_stalls_only_its_own_context() {
        let bus = EventBus::default();

        let stuck = Arc::new(ThreadContext::spawn("stuck").unwrap());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let _blocked = bus
            .subscribe(EventKind::ItemAdded, stuck.clone(), move |_| {
                let _ = entered_tx.send(());
                let _ = release_rx.lock().unwrap().recv();
            })
            .unwrap();

        let other = Arc::new(ThreadContext::spawn("other").unwrap());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let _h = bus
            .subscribe(EventKind::ItemAdded, other.clone(), move |ev| {
                tx.lock().unwrap().send(ev).unwrap();
            })
            .unwrap();

        bus.publish(&DomainEvent::item_added("c1", "i0", "x")).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for i in 1..=10 {
            bus.publish(&DomainEvent::item_added("c1", format!("i{i}"), "x"))
                .unwrap();
        }
        for i in 0..=10 {
            let ev = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(ev, DomainEvent::item_added("c1", format!("i{i}"), "x"));
        }

        // Unblock every pending delivery of the stuck context.
        drop(release_tx);
        stuck.shutdown();
        other.shutdown();
        assert_eq!(bus.stats().delivered, 22);
    }

    #[test]
    fn handle_outliving_bus_cancels_quietly() {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let mut h = bus.subscribe(EventKind::ContainerCreated, ui.clone(), |_| {}).unwrap();
        drop(bus);
        assert!(h.cancel());
    }
}
