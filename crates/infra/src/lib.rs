//! Infrastructure layer: projections, repository, persistence wiring, config.

pub mod config;
pub mod persistence;
pub mod projections;
pub mod repository;
pub mod runtime;


pub use config::{ConfigError, RuntimeConfig};
pub use persistence::{InMemoryPersistence, Persistence, PersistenceStats, PersistenceWorker};
pub use repository::{ContainerRepository, RepositoryError};
pub use runtime::{RuntimeError, TreeRuntime};
