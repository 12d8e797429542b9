//! Projection implementations (view model builders).
//!
//! Projections consume domain events from the bus and build read-oriented
//! models. They never query the producer and never fail on input.

pub mod tree;

pub use tree::{
    ContainerNode, ItemNode, OrphanPolicy, ProjectionConfig, ProjectionStats, TreeNode, TreeOrder,
    TreeProjection,
};
