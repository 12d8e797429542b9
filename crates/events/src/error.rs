//! Bus error taxonomy.

use thiserror::Error;

use crate::codec::CodecError;
use crate::event::EventKind;

/// Errors surfaced by the bus and the codec registry.
///
/// - `UnknownEventKind`: misconfiguration at subscribe/publish time; only the
///   failing call is affected.
/// - `MalformedPayload`: a payload did not decode (producer/consumer drift).
///   During delivery this is logged and the single delivery is dropped.
/// - `EncodingFailure`: the producer handed over an event that does not
///   survive an encode/decode round trip; returned to the publisher only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no codec registered for event kind {0}")]
    UnknownEventKind(EventKind),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] CodecError),

    #[error("failed to encode {kind}: {reason}")]
    EncodingFailure { kind: EventKind, reason: String },
}

impl BusError {
    pub fn encoding(kind: EventKind, reason: impl Into<String>) -> Self {
        BusError::EncodingFailure {
            kind,
            reason: reason.into(),
        }
    }
}
