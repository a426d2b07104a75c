//! Error taxonomy for the interop core.

use std::fmt;
use std::time::Duration;

use ferry_types::{CallHandle, ObjectId};

/// Failures from the tracked-object table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectTableError {
    /// The id is unknown, or was released.
    #[error("There is no tracked object with id '{0}'.")]
    NotFound(ObjectId),
    /// The entry is live but holds a different type than requested.
    #[error("tracked object {id} is not a {expected}")]
    TypeMismatch { id: ObjectId, expected: &'static str },
    /// The wrapper was created by a different table.
    #[error("tracked object {0} belongs to a different object table")]
    ForeignReference(ObjectId),
}

/// A payload that did not conform to the type the caller expected.
#[derive(Debug, thiserror::Error)]
#[error("payload is not a valid {expected}: {source}")]
pub struct DecodeError {
    expected: &'static str,
    #[source]
    source: serde_json::Error,
}

impl DecodeError {
    pub(crate) fn new(expected: &'static str, source: serde_json::Error) -> Self {
        Self { expected, source }
    }

    #[must_use]
    pub fn expected(&self) -> &'static str {
        self.expected
    }
}

/// Why a call settled as canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Token,
    /// No completion arrived within the timeout.
    Timeout(Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => f.write_str("cancellation requested"),
            Self::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

/// Failures from the byte transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("transport queue is full")]
    Backpressure,
    #[error("failed to encode frame")]
    Encode(#[source] serde_json::Error),
}

/// Outcome of an outbound call that did not resolve to a value.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Settled by the cancellation token or the timeout.
    #[error("call canceled: {0}")]
    Canceled(CancelReason),
    /// The script engine reported failure, or its result could not be decoded.
    #[error("{message}")]
    RemoteCallFailed {
        message: String,
        #[source]
        source: Option<DecodeError>,
    },
    /// The arguments could not be serialized.
    #[error("failed to serialize call arguments")]
    Serialize(#[source] serde_json::Error),
    /// The transport refused the call.
    #[error("failed to send call {handle}")]
    Send {
        handle: CallHandle,
        #[source]
        source: TransportError,
    },
    /// The peer went away before the call settled.
    #[error("peer disconnected: {0}")]
    Disconnected(String),
    /// The dispatcher was dropped with the call still pending.
    #[error("dispatcher dropped before the call settled")]
    Abandoned,
    /// A timeout or cancellation token was supplied outside a Tokio runtime.
    #[error("call timeouts and cancellation require a Tokio runtime")]
    NoRuntime,
}

impl CallError {
    pub(crate) fn remote(message: impl Into<String>) -> Self {
        Self::RemoteCallFailed {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn undecodable(identifier: &str, source: DecodeError) -> Self {
        Self::RemoteCallFailed {
            message: format!(
                "Failed to deserialize the result of '{identifier}' as {}. See the source error for details.",
                source.expected()
            ),
            source: Some(source),
        }
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}
