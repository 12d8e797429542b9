//! Container domain module (the event producer).
//!
//! A container is a box of items. Every accepted command yields exactly one
//! [`DomainEvent`](boxtree_events::DomainEvent); state only ever changes by
//! applying that event, so observers that see the event stream see every
//! mutation. No IO, no publishing, no storage in here.

pub mod container;

pub use container::{
    AddItem, Container, ContainerCommand, ContainerItem, ContainerState, CreateContainer,
    RemoveContainer, RemoveItem, RenameContainer,
};
