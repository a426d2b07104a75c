//! Message envelopes exchanged with the script engine.
//!
//! Host to engine:
//! - `{"type":"beginInvoke","handle","identifier","args","targetInstanceId"?}`
//! - `{"type":"endInvoke","callId","success","result"}`
//!
//! Engine to host:
//! - `{"type":"complete","handle","succeeded","payload"}`
//! - `{"type":"invoke","callId"?,"assembly"?,"method","objectId"?,"args"}`
//!
//! Incoming frames are parsed only as far as routing needs. A completion's
//! payload stays raw until the dispatcher knows the caller's type.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use ferry_types::{CallHandle, InvocationInfo, InvocationTarget, ObjectId};

use crate::deferred::DeferredResult;
use crate::transport::{InboundCompletion, OutboundCall};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum OutgoingFrame<'a> {
    BeginInvoke(&'a OutboundCall<'a>),
    EndInvoke(&'a InboundCompletion),
}

impl OutgoingFrame<'_> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

pub(crate) enum IncomingFrame {
    Completion {
        handle: CallHandle,
        succeeded: bool,
        result: DeferredResult,
    },
    Invocation {
        info: InvocationInfo,
        args: Box<RawValue>,
    },
}

/// Every field any incoming frame may carry. Plain struct deserialization
/// keeps `RawValue` fields borrowable from the frame text.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    handle: Option<CallHandle>,
    succeeded: Option<bool>,
    payload: Option<Box<RawValue>>,
    call_id: Option<String>,
    assembly: Option<String>,
    method: Option<String>,
    object_id: Option<ObjectId>,
    args: Option<Box<RawValue>>,
}

pub(crate) fn parse_incoming(body: &[u8]) -> Option<IncomingFrame> {
    let frame: RawFrame = match serde_json::from_slice(body) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::trace!("Ignoring unparseable frame: {e}");
            return None;
        }
    };

    match (frame.kind.as_str(), frame.handle, frame.succeeded, frame.method) {
        ("complete", Some(handle), Some(succeeded), _) => Some(IncomingFrame::Completion {
            handle,
            succeeded,
            result: frame.payload.map_or_else(DeferredResult::null, DeferredResult::new),
        }),
        ("invoke", _, _, Some(method)) => Some(IncomingFrame::Invocation {
            info: InvocationInfo::new(
                frame.call_id,
                InvocationTarget::new(frame.assembly, method, frame.object_id),
            ),
            // Missing args read as `null`, i.e. no arguments.
            args: frame.args.unwrap_or_else(|| RawValue::NULL.to_owned()),
        }),
        (kind, ..) => {
            tracing::trace!("Ignoring incomplete or unknown frame of type '{kind}'");
            None
        }
    }
}
