/// Execute an aggregate command deterministically (no IO, no async).
///
/// 1. **Decide**: `aggregate.handle(command)` produces events (pure, no mutation)
/// 2. **Evolve**: each event is applied back onto the aggregate
///
/// This mutates the aggregate in place. Callers that must not mutate before
/// an event is published run it on a copy and commit the copy afterwards.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
) -> Result<Vec<A::Event>, A::Error>
where
    A: boxtree_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
