//! Subscription handles (scoped registrations).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

use crate::bus::BusInner;
use crate::event::{DomainEvent, EventKind};

/// Identifier of one registration on a bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl core::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(crate) type Callback = Arc<dyn Fn(DomainEvent) + Send + Sync + 'static>;

/// Per-subscription state shared by the handle and every queued delivery.
///
/// Holds the context only by name. Queued jobs keep a registration alive, so
/// owning the context here would let an undrained queue keep itself alive.
pub(crate) struct Registration {
    pub(crate) id: SubscriptionId,
    pub(crate) kind: EventKind,
    pub(crate) context_name: String,
    // Taken on cancel so captures are released even while jobs are queued.
    callback: Mutex<Option<Callback>>,
    active: AtomicBool,
}

impl Registration {
    pub(crate) fn new(
        id: SubscriptionId,
        kind: EventKind,
        context_name: String,
        callback: Callback,
    ) -> Self {
        Self {
            id,
            kind,
            context_name,
            callback: Mutex::new(Some(callback)),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The callback, unless the subscription was cancelled.
    pub(crate) fn callback(&self) -> Option<Callback> {
        if !self.is_active() {
            return None;
        }
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flip to inactive and release the callback; true only for the call that
    /// did the flip.
    fn deactivate(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let released = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(released);
        true
    }
}

/// Owned token for one subscription.
///
/// Dropping the handle cancels the subscription, so a view that keeps its
/// handles as fields is unsubscribed on every exit path. Cancelling is
/// idempotent and safe while a delivery is running: that delivery completes,
/// nothing further is delivered.
///
/// ```ignore
/// let ui = Arc::new(QueueContext::new("ui"));
/// let handle = bus.subscribe(EventKind::ItemAdded, ui.clone(), |ev| println!("{ev:?}"))?;
/// // ... later, or implicitly on drop:
/// drop(handle);
/// ```
#[must_use = "dropping a SubscriptionHandle cancels the subscription"]
pub struct SubscriptionHandle {
    bus: Weak<BusInner>,
    registration: Arc<Registration>,
}

impl SubscriptionHandle {
    pub(crate) fn new(bus: Weak<BusInner>, registration: Arc<Registration>) -> Self {
        Self { bus, registration }
    }

    pub fn id(&self) -> SubscriptionId {
        self.registration.id
    }

    pub fn kind(&self) -> EventKind {
        self.registration.kind
    }

    pub fn context_name(&self) -> &str {
        &self.registration.context_name
    }

    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }

    /// Unregister. Returns `true` if this call performed the cancellation,
    /// `false` if the subscription was already cancelled.
    pub fn cancel(&mut self) -> bool {
        if !self.registration.deactivate() {
            return false;
        }
        // The bus may already be gone; then there is nothing to unregister from.
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(self.registration.kind, self.registration.id);
        }
        debug!(subscription = %self.registration.id, kind = %self.registration.kind, "subscription cancelled");
        true
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl core::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.registration.id)
            .field("kind", &self.registration.kind)
            .field("context", &self.registration.context_name)
            .field("active", &self.is_active())
            .finish()
    }
}
