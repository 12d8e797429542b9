//! Runtime configuration.
//!
//! Defaults are usable as-is; overrides come from the environment
//! (`BOXTREE_*`) or a JSON document. A value that does not parse is an error,
//! never a silent fallback.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::projections::tree::{
    DEFAULT_MAX_PENDING_ORPHANS, OrphanPolicy, ProjectionConfig, TreeOrder,
};

pub const ENV_ORPHAN_POLICY: &str = "BOXTREE_ORPHAN_POLICY";
pub const ENV_TREE_ORDER: &str = "BOXTREE_TREE_ORDER";
pub const ENV_MAX_PENDING_ORPHANS: &str = "BOXTREE_MAX_PENDING_ORPHANS";
pub const ENV_PERSISTENCE_LATENCY_MS: &str = "BOXTREE_PERSISTENCE_LATENCY_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub orphan_policy: OrphanPolicy,
    pub tree_order: TreeOrder,
    pub max_pending_orphans: usize,
    /// Artificial delay for each write of the in-memory persistence.
    pub persistence_latency_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::default(),
            tree_order: TreeOrder::default(),
            max_pending_orphans: DEFAULT_MAX_PENDING_ORPHANS,
            persistence_latency_ms: 0,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `BOXTREE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_ORPHAN_POLICY) {
            config.orphan_policy = parse(ENV_ORPHAN_POLICY, &v)?;
        }
        if let Some(v) = lookup(ENV_TREE_ORDER) {
            config.tree_order = parse(ENV_TREE_ORDER, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_PENDING_ORPHANS) {
            config.max_pending_orphans = parse(ENV_MAX_PENDING_ORPHANS, &v)?;
        }
        if let Some(v) = lookup(ENV_PERSISTENCE_LATENCY_MS) {
            config.persistence_latency_ms = parse(ENV_PERSISTENCE_LATENCY_MS, &v)?;
        }

        Ok(config)
    }

    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(doc)?)
    }

    pub fn projection(&self) -> ProjectionConfig {
        ProjectionConfig {
            orphan_policy: self.orphan_policy,
            order: self.tree_order,
            max_pending_orphans: self.max_pending_orphans,
        }
    }

    pub fn persistence_latency(&self) -> Duration {
        Duration::from_millis(self.persistence_latency_ms)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
