//! `boxtree-events`: typed domain events and the bus that carries them.
//!
//! Data flow:
//!
//! ```text
//! Aggregate mutation → DomainEvent → codec encode → EventBus
//!     → (subscriber's ExecutionContext) → codec decode → callback / Projection
//! ```

pub mod bus;
pub mod codec;
pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod payload;
pub mod projection;
pub mod subscription;

pub use bus::{BusStats, EventBus};
pub use codec::{CodecError, CodecRegistry, EventCodec, PayloadCodec, VariantCodec};
pub use context::{ExecutionContext, Job, QueueContext, ThreadContext};
pub use error::BusError;
pub use event::{
    ContainerCreated, ContainerRemoved, ContainerRenamed, DomainEvent, EVENT_SCHEMA_VERSION, Event,
    EventKind, ItemAdded, ItemRemoved,
};
pub use handler::execute;
pub use payload::{PayloadValue, TransportPayload};
pub use projection::Projection;
pub use subscription::{SubscriptionHandle, SubscriptionId};
