//! Container/item tree projection.
//!
//! Folds the container event stream into an ordered tree: containers at the
//! root, each owning its items. Events about different containers arrive in
//! no particular order, so an `ItemAdded` may show up before the
//! `ContainerCreated` it refers to. What happens then is the [`OrphanPolicy`]:
//! hold it until the container appears (default) or drop it.
//!
//! Per container: `absent → present → removed`. `removed` is terminal; a
//! removal that arrives before the creation still leaves a tombstone, so the
//! late creation is ignored.
//!
//! The projection never fails. Events it cannot use are counted in
//! [`ProjectionStats`] and logged at `debug` (or `warn` for evictions).

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use boxtree_core::{ContainerId, ItemId};
use boxtree_events::{
    BusError, ContainerCreated, ContainerRemoved, ContainerRenamed, DomainEvent, EventBus,
    EventKind, ExecutionContext, ItemAdded, ItemRemoved, Projection, SubscriptionHandle,
};

/// What to do with an item whose container has not been seen yet.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Keep it pending and replay it when the container is created.
    #[default]
    Buffer,
    /// Discard it; the item never appears.
    Drop,
}

/// Display order of containers (and of items within a container).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeOrder {
    /// Order of arrival at the projection.
    #[default]
    Sequence,
    /// Case-insensitive title, then id, then arrival.
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value '{0}'")]
pub struct ParseSettingError(pub String);

impl FromStr for OrphanPolicy {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(OrphanPolicy::Buffer),
            "drop" => Ok(OrphanPolicy::Drop),
            other => Err(ParseSettingError(other.to_string())),
        }
    }
}

impl FromStr for TreeOrder {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequence" => Ok(TreeOrder::Sequence),
            "title" => Ok(TreeOrder::Title),
            other => Err(ParseSettingError(other.to_string())),
        }
    }
}

pub const DEFAULT_MAX_PENDING_ORPHANS: usize = 1024;

/// Projection settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub orphan_policy: OrphanPolicy,
    pub order: TreeOrder,
    /// Upper bound on buffered orphans; the oldest is evicted beyond it.
    pub max_pending_orphans: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::Buffer,
            order: TreeOrder::Sequence,
            max_pending_orphans: DEFAULT_MAX_PENDING_ORPHANS,
        }
    }
}

/// Leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemNode {
    pub id: ItemId,
    pub title: String,
    /// Arrival sequence assigned by the projection.
    pub seq: u64,
}

/// Root-level node owning its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNode {
    pub id: ContainerId,
    pub title: String,
    pub seq: u64,
    pub children: Vec<ItemNode>,
}

impl ContainerNode {
    pub fn child(&self, item_id: &ItemId) -> Option<&ItemNode> {
        self.children.iter().find(|i| &i.id == item_id)
    }

    fn has_child(&self, item_id: &ItemId) -> bool {
        self.child(item_id).is_some()
    }
}

/// A node of the rendered hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Container(ContainerNode),
    Item(ItemNode),
}

impl TreeNode {
    pub fn id(&self) -> &str {
        match self {
            TreeNode::Container(c) => c.id.as_str(),
            TreeNode::Item(i) => i.id.as_str(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            TreeNode::Container(c) => &c.title,
            TreeNode::Item(i) => &i.title,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Item(_))
    }

    /// Children as tree nodes (always empty for an item).
    pub fn children(&self) -> Vec<TreeNode> {
        match self {
            TreeNode::Container(c) => c.children.iter().cloned().map(TreeNode::Item).collect(),
            TreeNode::Item(_) => Vec::new(),
        }
    }
}

/// Counters describing what the projection did with its input.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionStats {
    /// Events that changed the tree (or its tombstones/orphan buffer).
    pub applied: u64,
    /// Duplicates and events about nodes that are not there.
    pub ignored: u64,
    pub orphans_buffered: u64,
    pub orphans_replayed: u64,
    /// Orphans lost: drop policy, eviction, or their container was removed.
    pub orphans_dropped: u64,
}

#[derive(Debug)]
struct PendingItem {
    container_id: ContainerId,
    item: ItemNode,
}

#[derive(Debug, Default)]
struct TreeState {
    roots: Vec<ContainerNode>,
    removed: HashSet<ContainerId>,
    /// Buffered orphans in arrival order.
    pending: VecDeque<PendingItem>,
    next_seq: u64,
    stats: ProjectionStats,
}

impl TreeState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn position(&self, id: &ContainerId) -> Option<usize> {
        self.roots.iter().position(|c| &c.id == id)
    }

    fn apply(&mut self, config: &ProjectionConfig, event: &DomainEvent) {
        let changed = match event {
            DomainEvent::ContainerCreated(e) => self.on_container_created(e),
            DomainEvent::ContainerRenamed(e) => self.on_container_renamed(e),
            DomainEvent::ContainerRemoved(e) => self.on_container_removed(e),
            DomainEvent::ItemAdded(e) => self.on_item_added(config, e),
            DomainEvent::ItemRemoved(e) => self.on_item_removed(e),
        };

        if changed {
            self.stats.applied += 1;
            self.order_tree(config.order);
        } else {
            self.stats.ignored += 1;
        }
    }

    fn on_container_created(&mut self, e: &ContainerCreated) -> bool {
        if self.removed.contains(&e.container_id) {
            debug!(container = %e.container_id, "ignoring creation of removed container");
            return false;
        }
        if self.position(&e.container_id).is_some() {
            debug!(container = %e.container_id, "ignoring duplicate container creation");
            return false;
        }

        let mut node = ContainerNode {
            id: e.container_id.clone(),
            title: e.title.clone(),
            seq: self.next_seq(),
            children: Vec::new(),
        };

        // Replay orphans that were waiting for this container.
        let mut replayed = 0u64;
        let mut remaining = VecDeque::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            if pending.container_id != node.id {
                remaining.push_back(pending);
            } else if !node.has_child(&pending.item.id) {
                node.children.push(pending.item);
                replayed += 1;
            }
        }
        self.pending = remaining;

        if replayed > 0 {
            debug!(container = %node.id, replayed, "replayed buffered items");
        }
        self.stats.orphans_replayed += replayed;
        self.roots.push(node);
        true
    }

    fn on_container_renamed(&mut self, e: &ContainerRenamed) -> bool {
        match self.position(&e.container_id) {
            Some(idx) if self.roots[idx].title != e.title => {
                self.roots[idx].title = e.title.clone();
                true
            }
            Some(_) => false,
            None => {
                debug!(container = %e.container_id, "rename for container not in tree");
                false
            }
        }
    }

    fn on_container_removed(&mut self, e: &ContainerRemoved) -> bool {
        let mut changed = self.removed.insert(e.container_id.clone());

        if let Some(idx) = self.position(&e.container_id) {
            self.roots.remove(idx);
            changed = true;
        }

        let before = self.pending.len();
        self.pending.retain(|p| p.container_id != e.container_id);
        let discarded = (before - self.pending.len()) as u64;
        if discarded > 0 {
            debug!(container = %e.container_id, discarded, "discarded buffered items of removed container");
            self.stats.orphans_dropped += discarded;
            changed = true;
        }

        changed
    }

    fn on_item_added(&mut self, config: &ProjectionConfig, e: &ItemAdded) -> bool {
        if let Some(idx) = self.position(&e.container_id) {
            if self.roots[idx].has_child(&e.item_id) {
                debug!(container = %e.container_id, item = %e.item_id, "ignoring duplicate item");
                return false;
            }
            let item = ItemNode {
                id: e.item_id.clone(),
                title: e.title.clone(),
                seq: self.next_seq(),
            };
            self.roots[idx].children.push(item);
            return true;
        }

        if self.removed.contains(&e.container_id) {
            debug!(container = %e.container_id, item = %e.item_id, "dropping item for removed container");
            self.stats.orphans_dropped += 1;
            return false;
        }

        if config.orphan_policy == OrphanPolicy::Drop || config.max_pending_orphans == 0 {
            debug!(container = %e.container_id, item = %e.item_id, "dropping orphan item");
            self.stats.orphans_dropped += 1;
            return false;
        }

        let already_pending = self
            .pending
            .iter()
            .any(|p| p.container_id == e.container_id && p.item.id == e.item_id);
        if already_pending {
            return false;
        }

        if self.pending.len() >= config.max_pending_orphans {
            if let Some(evicted) = self.pending.pop_front() {
                warn!(
                    container = %evicted.container_id,
                    item = %evicted.item.id,
                    limit = config.max_pending_orphans,
                    "orphan buffer full; evicting oldest pending item"
                );
                self.stats.orphans_dropped += 1;
            }
        }

        let item = ItemNode {
            id: e.item_id.clone(),
            title: e.title.clone(),
            seq: self.next_seq(),
        };
        self.pending.push_back(PendingItem {
            container_id: e.container_id.clone(),
            item,
        });
        self.stats.orphans_buffered += 1;
        debug!(container = %e.container_id, item = %e.item_id, "buffered orphan item");
        true
    }

    fn on_item_removed(&mut self, e: &ItemRemoved) -> bool {
        if let Some(idx) = self.position(&e.container_id) {
            let children = &mut self.roots[idx].children;
            let before = children.len();
            children.retain(|i| i.id != e.item_id);
            return children.len() != before;
        }

        let before = self.pending.len();
        self.pending
            .retain(|p| !(p.container_id == e.container_id && p.item.id == e.item_id));
        self.pending.len() != before
    }

    /// Recompute the display order from node data.
    fn order_tree(&mut self, order: TreeOrder) {
        match order {
            TreeOrder::Sequence => {
                self.roots.sort_by_key(|c| c.seq);
                for c in &mut self.roots {
                    c.children.sort_by_key(|i| i.seq);
                }
            }
            TreeOrder::Title => {
                self.roots
                    .sort_by_cached_key(|c| (c.title.to_lowercase(), c.id.clone(), c.seq));
                for c in &mut self.roots {
                    c.children
                        .sort_by_cached_key(|i| (i.title.to_lowercase(), i.id.clone(), i.seq));
                }
            }
        }
    }
}

/// Tree view model fed by the event bus.
///
/// Usable two ways: as a plain [`Projection`] (`&mut self`, e.g. for replay),
/// or shared behind an `Arc` and fed by bus callbacks via
/// [`TreeProjection::apply_event`] / [`TreeProjection::attach`].
#[derive(Debug, Default)]
pub struct TreeProjection {
    config: ProjectionConfig,
    state: RwLock<TreeState>,
}

impl TreeProjection {
    pub fn new(config: ProjectionConfig) -> Self {
        Self {
            config,
            state: RwLock::new(TreeState::default()),
        }
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    // The projection must keep serving reads; a poisoned lock is recovered.
    fn read(&self) -> RwLockReadGuard<'_, TreeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one event through a shared reference.
    pub fn apply_event(&self, event: &DomainEvent) {
        self.write().apply(&self.config, event);
    }

    /// Subscribe this projection to every kind it understands, delivered on
    /// `context`. Dropping the returned handles detaches it again.
    pub fn attach(
        self: &Arc<Self>,
        bus: &EventBus,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Vec<SubscriptionHandle>, BusError> {
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let tree = Arc::clone(self);
                bus.subscribe(kind, context.clone(), move |event| tree.apply_event(&event))
            })
            .collect()
    }

    /// Snapshot of the root containers, in display order.
    pub fn roots(&self) -> Vec<ContainerNode> {
        self.read().roots.clone()
    }

    /// Snapshot of the tree as polymorphic nodes.
    pub fn nodes(&self) -> Vec<TreeNode> {
        self.read().roots.iter().cloned().map(TreeNode::Container).collect()
    }

    pub fn container(&self, id: &ContainerId) -> Option<ContainerNode> {
        self.read().roots.iter().find(|c| &c.id == id).cloned()
    }

    /// Whether `item_id` is displayed anywhere in the tree.
    pub fn contains_item(&self, item_id: &ItemId) -> bool {
        self.read().roots.iter().any(|c| c.has_child(item_id))
    }

    pub fn pending_orphans(&self) -> usize {
        self.read().pending.len()
    }

    pub fn stats(&self) -> ProjectionStats {
        self.read().stats
    }
}

impl Projection for TreeProjection {
    type Ev = DomainEvent;

    fn apply(&mut self, event: &Self::Ev) {
        let config = self.config;
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&config, event);
    }
}
