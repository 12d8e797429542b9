//! Command execution for container aggregates (the producer side).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load aggregate (or start from `Container::empty`)
//!   ↓
//! 2. Handle + apply on a copy (pure, exactly one event)
//!   ↓
//! 3. Publish the event on the bus
//!   ↓
//! 4. Commit the copy, enqueue the event for asynchronous persistence
//! ```
//!
//! If publishing fails nothing is committed: from an observer's point of view
//! there is no mutation without its event. Persistence completes later (or
//! fails later) and is never waited on; this is the optimistic-update path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use boxtree_boxes::{Container, ContainerCommand};
use boxtree_core::{ContainerId, DomainError};
use boxtree_events::{BusError, DomainEvent, Event, EventBus, execute};

use crate::persistence::{Persistence, PersistenceStats, PersistenceWorker};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The aggregate rejected the command.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The event could not be published; nothing was committed.
    #[error("publish failed: {0}")]
    Publish(#[from] BusError),

    /// The aggregate broke the one-event-per-mutation contract.
    #[error("aggregate emitted {0} events for one command")]
    EventCount(usize),

    #[error("repository lock poisoned")]
    Poisoned,
}

/// In-memory container repository that publishes before it persists.
pub struct ContainerRepository {
    bus: EventBus,
    containers: Mutex<HashMap<ContainerId, Container>>,
    persistence: PersistenceWorker,
}

impl ContainerRepository {
    pub fn new(bus: EventBus, sink: Arc<dyn Persistence>) -> std::io::Result<Self> {
        Ok(Self {
            bus,
            containers: Mutex::new(HashMap::new()),
            persistence: PersistenceWorker::spawn("boxtree-persistence", sink)?,
        })
    }

    /// Run a command; returns the event that was published for it.
    pub fn execute(&self, command: ContainerCommand) -> Result<DomainEvent, RepositoryError> {
        // Held across publish so that events of one aggregate are published,
        // committed and enqueued in the same order.
        let mut containers = self.containers.lock().map_err(|_| RepositoryError::Poisoned)?;

        let id = command.container_id().clone();
        let mut next = containers
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Container::empty(id.clone()));

        let mut events = execute(&mut next, &command)?;
        if events.len() != 1 {
            warn!(container = %id, count = events.len(), "aggregate broke one-event contract");
            return Err(RepositoryError::EventCount(events.len()));
        }
        let event = events.remove(0);

        let deliveries = self.bus.publish(&event)?;
        containers.insert(id, next);
        self.persistence.enqueue(event.clone());

        debug!(kind = %event.kind(), container = %event.container_id(), deliveries, "command committed");
        Ok(event)
    }

    /// Current state of one aggregate.
    pub fn get(&self, id: &ContainerId) -> Option<Container> {
        self.containers.lock().ok()?.get(id).cloned()
    }

    pub fn persistence_stats(&self) -> PersistenceStats {
        self.persistence.stats()
    }

    /// Wait for outstanding writes; `false` on timeout.
    pub fn settle(&self, timeout: Duration) -> bool {
        self.persistence.settle(timeout)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl core::fmt::Debug for ContainerRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContainerRepository")
            .field("persistence", &self.persistence.stats())
            .finish()
    }
}
