use crate::Event;

/// A projection folds an event stream into a read-oriented view model.
///
/// Projections are the consumer side of the bus: they never query the
/// producer, they only see the events it published.
///
/// ## Idempotency
///
/// Delivery may repeat an event (a producer retry, a replay). Applying the
/// same event twice must leave the projection as applying it once did.
///
/// ## Ordering
///
/// Events about *different* aggregates may arrive in any order, so an event
/// can refer to something the projection has not seen yet. How that is handled
/// is a projection policy; it must never be a panic.
///
/// ## Error Handling
///
/// `apply` doesn't return errors - an event that cannot be used is either
/// ignored, held back, or logged, and the projection carries on.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event, updating the view model.
    fn apply(&mut self, event: &Self::Ev);
}
