//! Call dispatch and object-reference lifetime between a host and a script
//! engine that share no memory.
//!
//! Outbound calls are correlated with their completions by handle in the
//! [`Dispatcher`]; host objects are exposed to the engine by id through the
//! [`ObjectTable`]. Moving bytes is left to a [`Transport`]; [`ScriptPeer`]
//! is a ready-made one for engines speaking framed JSON over stdio.

pub mod config;
pub mod error;
pub mod frame;

mod deferred;
mod dispatcher;
mod inbound;
mod object_table;
mod peer;
mod reference_codec;
mod remote_object;
mod transport;

pub(crate) mod wire;

pub use config::{EngineConfig, InteropConfig};
pub use deferred::DeferredResult;
pub use dispatcher::{CallFuture, CallOptions, Dispatcher, DispatcherBuilder};
pub use error::{CallError, CancelReason, DecodeError, ObjectTableError, TransportError};
pub use inbound::{
    DetailedErrors, ErrorSanitizer, GenericErrors, InvocationResult, generic_error_message,
};
pub use object_table::{ObjectTable, TrackedRef};
pub use peer::{PeerConnection, PeerEvent, PeerStopReason, PeerTransport, ScriptPeer};
pub use reference_codec::{
    HOST_OBJECT_MARKER, ObjectRefToken, REMOTE_OBJECT_MARKER, decode_sentinel, encode_sentinel,
};
pub use remote_object::{RELEASE_REMOTE_OBJECT, RemoteObject};
pub use transport::{InboundCompletion, OutboundCall, Transport};

pub use ferry_types::{
    CallHandle, InvocationInfo, InvocationTarget, ObjectId, RemoteObjectId,
};
pub use tokio_util::sync::CancellationToken;
