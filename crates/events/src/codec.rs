//! Event codec: typed events ↔ untyped transport payloads.
//!
//! This is the only place that reads or writes payload keys. Everything on
//! either side of it is typed.
//!
//! Decoding never substitutes defaults: a missing or mistyped key, a blank
//! identifier or a different `schema_version` is an explicit error, so that
//! producer/consumer drift shows up instead of being papered over.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use boxtree_core::{ContainerId, ItemId};

use crate::error::BusError;
use crate::event::{
    ContainerCreated, ContainerRemoved, ContainerRenamed, DomainEvent, EVENT_SCHEMA_VERSION, Event,
    EventKind, ItemAdded, ItemRemoved,
};
use crate::payload::{PayloadValue, TransportPayload};

/// Payload schema version written by every codec in this crate.
pub const SCHEMA_VERSION: i64 = EVENT_SCHEMA_VERSION as i64;

pub const KEY_SCHEMA_VERSION: &str = "schema_version";
pub const KEY_CONTAINER_ID: &str = "container_id";
pub const KEY_ITEM_ID: &str = "item_id";
pub const KEY_TITLE: &str = "title";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{kind}: missing key '{key}'")]
    MissingKey { kind: EventKind, key: String },

    #[error("{kind}: key '{key}' expected {expected}, found {found}")]
    TypeMismatch {
        kind: EventKind,
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{kind}: schema version {found} (expected {expected})")]
    VersionMismatch { kind: EventKind, expected: i64, found: i64 },

    #[error("codec for {expected} cannot handle {found}")]
    KindMismatch { expected: EventKind, found: EventKind },

    #[error("{kind}: invalid value for '{key}': {reason}")]
    InvalidValue {
        kind: EventKind,
        key: String,
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn type_mismatch(
        kind: EventKind,
        key: &str,
        expected: &'static str,
        found: &PayloadValue,
    ) -> Self {
        CodecError::TypeMismatch {
            kind,
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    fn blank(kind: EventKind, key: &str) -> Self {
        CodecError::InvalidValue {
            kind,
            key: key.to_string(),
            reason: "identifier is blank".to_string(),
        }
    }
}

/// Object-safe codec for one [`EventKind`], as stored in a [`CodecRegistry`].
pub trait EventCodec: Send + Sync {
    fn kind(&self) -> EventKind;

    fn encode(&self, event: &DomainEvent) -> Result<TransportPayload, CodecError>;

    fn decode(&self, payload: &TransportPayload) -> Result<DomainEvent, CodecError>;
}

/// Per-variant payload mapping.
///
/// Implemented by each event struct; [`VariantCodec`] lifts it into an
/// [`EventCodec`] and adds the schema version handling shared by all variants.
pub trait PayloadCodec: Sized + Send + Sync + 'static {
    const KIND: EventKind;

    fn write_payload(&self, payload: &mut TransportPayload) -> Result<(), CodecError>;

    fn read_payload(payload: &TransportPayload) -> Result<Self, CodecError>;

    /// Borrow this variant out of a [`DomainEvent`], if it is one.
    fn project(event: &DomainEvent) -> Option<&Self>;

    fn into_event(self) -> DomainEvent;
}

/// Generic [`EventCodec`] for any [`PayloadCodec`] variant.
pub struct VariantCodec<T> {
    _variant: PhantomData<fn() -> T>,
}

impl<T> VariantCodec<T> {
    pub fn new() -> Self {
        Self {
            _variant: PhantomData,
        }
    }
}

impl<T> Default for VariantCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for VariantCodec<T>
where
    T: PayloadCodec,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VariantCodec").field("kind", &T::KIND).finish()
    }
}

impl<T> EventCodec for VariantCodec<T>
where
    T: PayloadCodec,
{
    fn kind(&self) -> EventKind {
        T::KIND
    }

    fn encode(&self, event: &DomainEvent) -> Result<TransportPayload, CodecError> {
        let variant = T::project(event).ok_or(CodecError::KindMismatch {
            expected: T::KIND,
            found: event.kind(),
        })?;

        let mut payload = TransportPayload::new();
        payload.insert(KEY_SCHEMA_VERSION, SCHEMA_VERSION);
        variant.write_payload(&mut payload)?;
        Ok(payload)
    }

    fn decode(&self, payload: &TransportPayload) -> Result<DomainEvent, CodecError> {
        let found = payload.require_int(T::KIND, KEY_SCHEMA_VERSION)?;
        if found != SCHEMA_VERSION {
            return Err(CodecError::VersionMismatch {
                kind: T::KIND,
                expected: SCHEMA_VERSION,
                found,
            });
        }
        T::read_payload(payload).map(T::into_event)
    }
}

fn write_id(
    payload: &mut TransportPayload,
    kind: EventKind,
    key: &str,
    value: &str,
) -> Result<(), CodecError> {
    if value.trim().is_empty() {
        return Err(CodecError::blank(kind, key));
    }
    payload.insert(key, value);
    Ok(())
}

fn read_id(payload: &TransportPayload, kind: EventKind, key: &str) -> Result<String, CodecError> {
    let value = payload.require_str(kind, key)?;
    if value.trim().is_empty() {
        return Err(CodecError::blank(kind, key));
    }
    Ok(value.to_string())
}

fn read_container_id(payload: &TransportPayload, kind: EventKind) -> Result<ContainerId, CodecError> {
    read_id(payload, kind, KEY_CONTAINER_ID).map(ContainerId::from)
}

fn read_item_id(payload: &TransportPayload, kind: EventKind) -> Result<ItemId, CodecError> {
    read_id(payload, kind, KEY_ITEM_ID).map(ItemId::from)
}

impl PayloadCodec for ContainerCreated {
    const KIND: EventKind = EventKind::ContainerCreated;

    fn write_payload(&self, payload: &mut TransportPayload) -> Result<(), CodecError> {
        write_id(payload, Self::KIND, KEY_CONTAINER_ID, self.container_id.as_str())?;
        payload.insert(KEY_TITLE, self.title.as_str());
        Ok(())
    }

    fn read_payload(payload: &TransportPayload) -> Result<Self, CodecError> {
        Ok(Self {
            container_id: read_container_id(payload, Self::KIND)?,
            title: payload.require_str(Self::KIND, KEY_TITLE)?.to_string(),
        })
    }

    fn project(event: &DomainEvent) -> Option<&Self> {
        match event {
            DomainEvent::ContainerCreated(e) => Some(e),
            _ => None,
        }
    }

    fn into_event(self) -> DomainEvent {
        DomainEvent::ContainerCreated(self)
    }
}

impl PayloadCodec for ContainerRenamed {
    const KIND: EventKind = EventKind::ContainerRenamed;

    fn write_payload(&self, payload: &mut TransportPayload) -> Result<(), CodecError> {
        write_id(payload, Self::KIND, KEY_CONTAINER_ID, self.container_id.as_str())?;
        payload.insert(KEY_TITLE, self.title.as_str());
        Ok(())
    }

    fn read_payload(payload: &TransportPayload) -> Result<Self, CodecError> {
        Ok(Self {
            container_id: read_container_id(payload, Self::KIND)?,
            title: payload.require_str(Self::KIND, KEY_TITLE)?.to_string(),
        })
    }

    fn project(event: &DomainEvent) -> Option<&Self> {
        match event {
            DomainEvent::ContainerRenamed(e) => Some(e),
            _ => None,
        }
    }

    fn into_event(self) -> DomainEvent {
        DomainEvent::ContainerRenamed(self)
    }
}

impl PayloadCodec for ContainerRemoved {
    const KIND: EventKind = EventKind::ContainerRemoved;

    fn write_payload(&self, payload: &mut TransportPayload) -> Result<(), CodecError> {
        write_id(payload, Self::KIND, KEY_CONTAINER_ID, self.container_id.as_str())
    }

    fn read_payload(payload: &TransportPayload) -> Result<Self, CodecError> {
        Ok(Self {
            container_id: read_container_id(payload, Self::KIND)?,
        })
    }

    fn project(event: &DomainEvent) -> Option<&Self> {
        match event {
            DomainEvent::ContainerRemoved(e) => Some(e),
            _ => None,
        }
    }

    fn into_event(self) -> DomainEvent {
        DomainEvent::ContainerRemoved(self)
    }
}

impl PayloadCodec for ItemAdded {
    const KIND: EventKind = EventKind::ItemAdded;

    fn write_payload(&self, payload: &mut TransportPayload) -> Result<(), CodecError> {
        write_id(payload, Self::KIND, KEY_CONTAINER_ID, self.container_id.as_str())?;
        write_id(payload, Self::KIND, KEY_ITEM_ID, self.item_id.as_str())?;
        payload.insert(KEY_TITLE, self.title.as_str());
        Ok(())
    }

    fn read_payload(payload: &TransportPayload) -> Result<Self, CodecError> {
        Ok(Self {
            container_id: read_container_id(payload, Self::KIND)?,
            item_id: read_item_id(payload, Self::KIND)?,
            title: payload.require_str(Self::KIND, KEY_TITLE)?.to_string(),
        })
    }

    fn project(event: &DomainEvent) -> Option<&Self> {
        match event {
            DomainEvent::ItemAdded(e) => Some(e),
            _ => None,
        }
    }

    fn into_event(self) -> DomainEvent {
        DomainEvent::ItemAdded(self)
    }
}

impl PayloadCodec for ItemRemoved {
    const KIND: EventKind = EventKind::ItemRemoved;

    fn write_payload(&self, payload: &mut TransportPayload) -> Result<(), CodecError> {
        write_id(payload, Self::KIND, KEY_CONTAINER_ID, self.container_id.as_str())?;
        write_id(payload, Self::KIND, KEY_ITEM_ID, self.item_id.as_str())
    }

    fn read_payload(payload: &TransportPayload) -> Result<Self, CodecError> {
        Ok(Self {
            container_id: read_container_id(payload, Self::KIND)?,
            item_id: read_item_id(payload, Self::KIND)?,
        })
    }

    fn project(event: &DomainEvent) -> Option<&Self> {
        match event {
            DomainEvent::ItemRemoved(e) => Some(e),
            _ => None,
        }
    }

    fn into_event(self) -> DomainEvent {
        DomainEvent::ItemRemoved(self)
    }
}

/// Lookup table of codecs by [`EventKind`].
///
/// `CodecRegistry::new()` is empty; `CodecRegistry::default()` knows every
/// kind in this crate. A kind without a codec cannot be subscribed to or
/// published.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<EventKind, Arc<dyn EventCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register a codec, replacing (and returning) any codec already registered
    /// for the same kind.
    pub fn register<C>(&mut self, codec: C) -> Option<Arc<dyn EventCodec>>
    where
        C: EventCodec + 'static,
    {
        self.codecs.insert(codec.kind(), Arc::new(codec))
    }

    pub fn with<C>(mut self, codec: C) -> Self
    where
        C: EventCodec + 'static,
    {
        self.register(codec);
        self
    }

    pub fn get(&self, kind: EventKind) -> Option<&Arc<dyn EventCodec>> {
        self.codecs.get(&kind)
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.codecs.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.codecs.keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn require(&self, kind: EventKind) -> Result<&Arc<dyn EventCodec>, BusError> {
        self.get(kind).ok_or(BusError::UnknownEventKind(kind))
    }

    /// Encode a typed event; failures are the producer's problem.
    pub fn encode(&self, event: &DomainEvent) -> Result<TransportPayload, BusError> {
        let kind = event.kind();
        self.require(kind)?
            .encode(event)
            .map_err(|e| BusError::encoding(kind, e.to_string()))
    }

    /// Decode a payload that was routed under `kind`.
    pub fn decode(&self, kind: EventKind, payload: &TransportPayload) -> Result<DomainEvent, BusError> {
        self.require(kind)?
            .decode(payload)
            .map_err(BusError::MalformedPayload)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        CodecRegistry::new()
            .with(VariantCodec::<ContainerCreated>::new())
            .with(VariantCodec::<ContainerRenamed>::new())
            .with(VariantCodec::<ContainerRemoved>::new())
            .with(VariantCodec::<ItemAdded>::new())
            .with(VariantCodec::<ItemRemoved>::new())
    }
}

impl core::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
