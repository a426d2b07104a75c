//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};

use ferry_interop::{
    CallHandle, Dispatcher, InboundCompletion, OutboundCall, RemoteObjectId, Transport,
    TransportError,
};

/// An outbound call as the engine would receive it.
#[derive(Debug, Clone)]
pub struct SentCall {
    pub handle: CallHandle,
    pub identifier: String,
    pub args: serde_json::Value,
    pub target: Option<RemoteObjectId>,
}

/// Transport that keeps everything it is given.
#[derive(Default)]
pub struct MemoryTransport {
    calls: Mutex<Vec<SentCall>>,
    completions: Mutex<Vec<InboundCompletion>>,
}

impl MemoryTransport {
    pub fn calls(&self) -> Vec<SentCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn completions(&self) -> Vec<InboundCompletion> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MemoryTransport {
    fn begin_invoke(&self, call: &OutboundCall<'_>) -> Result<(), TransportError> {
        let args = serde_json::from_str(call.args.get()).map_err(TransportError::Encode)?;
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentCall {
                handle: call.handle,
                identifier: call.identifier.to_string(),
                args,
                target: call.target_instance_id,
            });
        Ok(())
    }

    fn end_invoke(&self, completion: &InboundCompletion) -> Result<(), TransportError> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(completion.clone());
        Ok(())
    }
}

pub fn dispatcher() -> (Dispatcher, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::default());
    let dispatcher = Dispatcher::builder(transport.clone()).build();
    (dispatcher, transport)
}
