//! Weakly-typed transport payload.
//!
//! The bus moves events between contexts as string-keyed maps of primitive
//! values. Only the codec is allowed to look inside; the `require_*`
//! accessors are how it does so without ever substituting defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::event::EventKind;

/// A primitive transport value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PayloadValue {
    /// Human-readable type name (used in decode diagnostics).
    pub fn type_name(&self) -> &'static str {
        match self {
            PayloadValue::Str(_) => "string",
            PayloadValue::Int(_) => "integer",
            PayloadValue::Bool(_) => "boolean",
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Str(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::Str(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Int(value)
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

/// Ordered key → primitive map carried by the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportPayload {
    entries: BTreeMap<String, PayloadValue>,
}

impl TransportPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or overwrite) a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PayloadValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, kind: EventKind, key: &str) -> Result<&PayloadValue, CodecError> {
        self.entries.get(key).ok_or_else(|| CodecError::MissingKey {
            kind,
            key: key.to_string(),
        })
    }

    pub fn require_str(&self, kind: EventKind, key: &str) -> Result<&str, CodecError> {
        match self.require(kind, key)? {
            PayloadValue::Str(s) => Ok(s),
            other => Err(CodecError::type_mismatch(kind, key, "string", other)),
        }
    }

    pub fn require_int(&self, kind: EventKind, key: &str) -> Result<i64, CodecError> {
        match self.require(kind, key)? {
            PayloadValue::Int(i) => Ok(*i),
            other => Err(CodecError::type_mismatch(kind, key, "integer", other)),
        }
    }

    pub fn require_bool(&self, kind: EventKind, key: &str) -> Result<bool, CodecError> {
        match self.require(kind, key)? {
            PayloadValue::Bool(b) => Ok(*b),
            other => Err(CodecError::type_mismatch(kind, key, "boolean", other)),
        }
    }
}

impl core::fmt::Display for TransportPayload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.entries),
        }
    }
}
