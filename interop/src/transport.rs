//! The send side of the boundary, supplied by the integrator.

use serde::Serialize;
use serde_json::value::RawValue;

use ferry_types::{CallHandle, RemoteObjectId};

use crate::error::TransportError;

/// An outbound call, ready to hand to the transport.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCall<'a> {
    pub handle: CallHandle,
    pub identifier: &'a str,
    /// Positional argument array, already encoded.
    pub args: &'a RawValue,
    /// Engine-side object the call is aimed at, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_instance_id: Option<RemoteObjectId>,
}

/// The result of an inbound call, ready to report back.
///
/// On failure `result` is the sanitized error text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCompletion {
    pub call_id: String,
    pub success: bool,
    pub result: serde_json::Value,
}

/// Moves encoded messages to the script engine.
///
/// Both methods are synchronous: they enqueue and return. Delivery, remote
/// execution and the eventual reply all happen elsewhere.
///
/// `begin_invoke` runs while the dispatcher's pending table is locked and
/// must not call back into the dispatcher.
pub trait Transport: Send + Sync {
    fn begin_invoke(&self, call: &OutboundCall<'_>) -> Result<(), TransportError>;

    fn end_invoke(&self, completion: &InboundCompletion) -> Result<(), TransportError>;
}
