//! Composition root.
//!
//! Owns the process-wide bus and wires the UI context, the tree projection
//! and the repository together. Everything else receives the bus from here.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use boxtree_events::{BusError, EventBus, QueueContext, SubscriptionHandle};

use crate::config::RuntimeConfig;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::projections::tree::TreeProjection;
use crate::repository::ContainerRepository;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to attach projection: {0}")]
    Bus(#[from] BusError),

    #[error("failed to start worker: {0}")]
    Io(#[from] std::io::Error),
}

/// A running bus + tree + repository.
///
/// The tree is fed on the `ui` context; call [`TreeRuntime::pump`] from the
/// owning loop to deliver pending events.
pub struct TreeRuntime {
    // Dropped first, detaching the tree before anything else goes away.
    subscriptions: Vec<SubscriptionHandle>,
    bus: EventBus,
    ui: Arc<QueueContext>,
    tree: Arc<TreeProjection>,
    repository: ContainerRepository,
}

impl TreeRuntime {
    /// Start with in-memory persistence configured from `config`.
    pub fn start(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let sink = Arc::new(InMemoryPersistence::with_latency(config.persistence_latency()));
        Self::start_with(config, sink)
    }

    pub fn start_with(config: &RuntimeConfig, sink: Arc<dyn Persistence>) -> Result<Self, RuntimeError> {
        let bus = EventBus::default();
        let ui = Arc::new(QueueContext::new("ui"));
        let tree = Arc::new(TreeProjection::new(config.projection()));

        let subscriptions = tree.attach(&bus, ui.clone())?;
        let repository = ContainerRepository::new(bus.clone(), sink)?;

        info!(
            orphan_policy = ?config.orphan_policy,
            tree_order = ?config.tree_order,
            subscriptions = subscriptions.len(),
            "tree runtime started"
        );

        Ok(Self {
            subscriptions,
            bus,
            ui,
            tree,
            repository,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn ui(&self) -> &Arc<QueueContext> {
        &self.ui
    }

    pub fn tree(&self) -> &Arc<TreeProjection> {
        &self.tree
    }

    pub fn repository(&self) -> &ContainerRepository {
        &self.repository
    }

    /// Deliver everything queued for the UI context; returns deliveries run.
    pub fn pump(&self) -> usize {
        self.ui.run_pending()
    }

    /// Detach the tree from the bus; later events no longer reach it.
    pub fn detach(&mut self) {
        for handle in &mut self.subscriptions {
            handle.cancel();
        }
        self.subscriptions.clear();
    }
}

impl core::fmt::Debug for TreeRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TreeRuntime")
            .field("bus", &self.bus)
            .field("ui", &self.ui)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
