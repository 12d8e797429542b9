//! Typed domain events.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use boxtree_core::{ContainerId, ItemId};

/// Schema version of every event in this crate; codecs write it to payloads.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - routed purely by their [`EventKind`]
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dispatch key for this event.
    fn kind(&self) -> EventKind;

    /// Stable event name/type identifier (e.g. "container.created").
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Schema version for this event type.
    fn version(&self) -> u32;
}

/// Closed set of event kinds; the only thing the bus looks at when routing.
///
/// Serialized under the same dotted names as [`EventKind::as_str`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "container.created")]
    ContainerCreated,
    #[serde(rename = "container.renamed")]
    ContainerRenamed,
    #[serde(rename = "container.removed")]
    ContainerRemoved,
    #[serde(rename = "item.added")]
    ItemAdded,
    #[serde(rename = "item.removed")]
    ItemRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::ContainerCreated,
        EventKind::ContainerRenamed,
        EventKind::ContainerRemoved,
        EventKind::ItemAdded,
        EventKind::ItemRemoved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ContainerCreated => "container.created",
            EventKind::ContainerRenamed => "container.renamed",
            EventKind::ContainerRemoved => "container.removed",
            EventKind::ItemAdded => "item.added",
            EventKind::ItemRemoved => "item.removed",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct ParseEventKindError(pub String);

impl FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseEventKindError(s.to_string()))
    }
}

/// Event: a container was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCreated {
    pub container_id: ContainerId,
    pub title: String,
}

/// Event: a container's title changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRenamed {
    pub container_id: ContainerId,
    pub title: String,
}

/// Event: a container (and everything in it) was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRemoved {
    pub container_id: ContainerId,
}

/// Event: an item was added to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAdded {
    pub container_id: ContainerId,
    pub item_id: ItemId,
    pub title: String,
}

/// Event: an item was removed from its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRemoved {
    pub container_id: ContainerId,
    pub item_id: ItemId,
}

/// Every fact the container domain can publish.
///
/// Variants only carry identifiers and display data, never aggregate
/// references, so any subscriber can act on them without re-querying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    ContainerCreated(ContainerCreated),
    ContainerRenamed(ContainerRenamed),
    ContainerRemoved(ContainerRemoved),
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
}

impl DomainEvent {
    pub fn container_created(container_id: impl Into<ContainerId>, title: impl Into<String>) -> Self {
        DomainEvent::ContainerCreated(ContainerCreated {
            container_id: container_id.into(),
            title: title.into(),
        })
    }

    pub fn container_renamed(container_id: impl Into<ContainerId>, title: impl Into<String>) -> Self {
        DomainEvent::ContainerRenamed(ContainerRenamed {
            container_id: container_id.into(),
            title: title.into(),
        })
    }

    pub fn container_removed(container_id: impl Into<ContainerId>) -> Self {
        DomainEvent::ContainerRemoved(ContainerRemoved {
            container_id: container_id.into(),
        })
    }

    pub fn item_added(
        container_id: impl Into<ContainerId>,
        item_id: impl Into<ItemId>,
        title: impl Into<String>,
    ) -> Self {
        DomainEvent::ItemAdded(ItemAdded {
            container_id: container_id.into(),
            item_id: item_id.into(),
            title: title.into(),
        })
    }

    pub fn item_removed(container_id: impl Into<ContainerId>, item_id: impl Into<ItemId>) -> Self {
        DomainEvent::ItemRemoved(ItemRemoved {
            container_id: container_id.into(),
            item_id: item_id.into(),
        })
    }

    /// The container this event is about.
    pub fn container_id(&self) -> &ContainerId {
        match self {
            DomainEvent::ContainerCreated(e) => &e.container_id,
            DomainEvent::ContainerRenamed(e) => &e.container_id,
            DomainEvent::ContainerRemoved(e) => &e.container_id,
            DomainEvent::ItemAdded(e) => &e.container_id,
            DomainEvent::ItemRemoved(e) => &e.container_id,
        }
    }
}

impl Event for DomainEvent {
    fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ContainerCreated(_) => EventKind::ContainerCreated,
            DomainEvent::ContainerRenamed(_) => EventKind::ContainerRenamed,
            DomainEvent::ContainerRemoved(_) => EventKind::ContainerRemoved,
            DomainEvent::ItemAdded(_) => EventKind::ItemAdded,
            DomainEvent::ItemRemoved(_) => EventKind::ItemRemoved,
        }
    }

    fn version(&self) -> u32 {
        EVENT_SCHEMA_VERSION
    }
}
