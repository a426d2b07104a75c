//! Outbound call dispatcher.
//!
//! Every call gets a handle from a per-dispatcher counter and an entry in the
//! pending table. The entry owns the caller's oneshot sender behind a boxed
//! settlement closure, so the table holds calls of any result type; the
//! concrete type is only applied when a completion is decoded.
//!
//! An entry leaves the table exactly once. Whoever removes it (a completion,
//! the cancellation token, the timeout, a send failure, a disconnect) settles
//! the call; anything arriving later for the same handle finds no entry and
//! is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use ferry_types::{CallHandle, InvocationInfo, RemoteObjectId};

use crate::config::InteropConfig;
use crate::deferred::DeferredResult;
use crate::error::{CallError, CancelReason, TransportError};
use crate::inbound::{self, DetailedErrors, ErrorSanitizer, GenericErrors, InvocationResult};
use crate::object_table::{ObjectTable, TrackedRef};
use crate::reference_codec;
use crate::transport::{OutboundCall, Transport};

/// Per-call cancellation and timeout.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    cancellation: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Overrides the dispatcher's default timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

enum Settlement {
    Completed {
        succeeded: bool,
        result: DeferredResult,
    },
    Canceled(CancelReason),
    Disconnected(String),
}

type Settle = Box<dyn FnOnce(Settlement) + Send>;

struct PendingCall {
    identifier: String,
    settle: Settle,
    watcher: Option<AbortHandle>,
}

impl PendingCall {
    fn settle(self, settlement: Settlement) {
        if let Some(watcher) = self.watcher {
            watcher.abort();
        }
        (self.settle)(settlement);
    }
}

struct Shared {
    next_handle: AtomicU64,
    pending: Mutex<HashMap<CallHandle, PendingCall>>,
    objects: ObjectTable,
    transport: Arc<dyn Transport>,
    sanitizer: Arc<dyn ErrorSanitizer>,
    default_timeout: Option<Duration>,
}

impl Shared {
    fn take(&self, handle: CallHandle) -> Option<PendingCall> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    fn cancel(&self, handle: CallHandle, reason: CancelReason) {
        match self.take(handle) {
            Some(call) => {
                tracing::debug!(%handle, identifier = %call.identifier, %reason, "Call canceled");
                call.settle(Settlement::Canceled(reason));
            }
            None => tracing::trace!(%handle, "Cancellation for settled call ignored"),
        }
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    sanitizer: Arc<dyn ErrorSanitizer>,
    default_timeout: Option<Duration>,
}

impl DispatcherBuilder {
    /// Applied to calls that do not set their own timeout.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn ErrorSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            shared: Arc::new(Shared {
                next_handle: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                objects: ObjectTable::new(),
                transport: self.transport,
                sanitizer: self.sanitizer,
                default_timeout: self.default_timeout,
            }),
        }
    }
}

/// Correlates outbound calls with their completions and owns the object table.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn builder(transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder {
            transport,
            sanitizer: Arc::new(GenericErrors),
            default_timeout: None,
        }
    }

    /// Build from configuration: default timeout and error detail policy.
    pub fn from_config(transport: Arc<dyn Transport>, config: &InteropConfig) -> Self {
        let sanitizer: Arc<dyn ErrorSanitizer> = if config.detailed_errors {
            Arc::new(DetailedErrors)
        } else {
            Arc::new(GenericErrors)
        };
        Self::builder(transport)
            .default_timeout(config.default_timeout())
            .sanitizer(sanitizer)
            .build()
    }

    /// The table of host objects exposed through this dispatcher.
    #[must_use]
    pub fn objects(&self) -> &ObjectTable {
        &self.shared.objects
    }

    /// Track `value` so it can be passed to the script engine by reference.
    pub fn track<T: Send + Sync + 'static>(&self, value: T) -> TrackedRef<T> {
        self.shared.objects.create(value)
    }

    /// Number of calls still waiting for settlement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call `identifier` in the script engine.
    ///
    /// `args` is the positional argument list: a tuple, array or slice. `()`
    /// means no arguments; any other value is sent as the single argument.
    ///
    /// The call is registered and handed to the transport before this
    /// returns; the future only waits for settlement. Cancellation and
    /// timeouts need a Tokio runtime.
    pub fn invoke<T, A>(&self, identifier: &str, args: &A, options: CallOptions) -> CallFuture<T>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize + ?Sized,
    {
        self.dispatch(None, identifier, args, options)
    }

    /// Call a method on an object that lives in the script engine.
    pub fn invoke_on<T, A>(
        &self,
        target: RemoteObjectId,
        identifier: &str,
        args: &A,
        options: CallOptions,
    ) -> CallFuture<T>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize + ?Sized,
    {
        self.dispatch(Some(target), identifier, args, options)
    }

    fn dispatch<T, A>(
        &self,
        target: Option<RemoteObjectId>,
        identifier: &str,
        args: &A,
        options: CallOptions,
    ) -> CallFuture<T>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize + ?Sized,
    {
        if let Some(token) = &options.cancellation
            && token.is_cancelled()
        {
            return CallFuture::ready(Err(CallError::Canceled(CancelReason::Token)));
        }

        let timeout = options.timeout.or(self.shared.default_timeout);
        let needs_watcher = timeout.is_some() || options.cancellation.is_some();
        let runtime = tokio::runtime::Handle::try_current();
        if needs_watcher && runtime.is_err() {
            return CallFuture::ready(Err(CallError::NoRuntime));
        }

        let handle = CallHandle::new(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.register::<T>(handle, identifier, tx);

        let token = options.cancellation.clone();
        if let Ok(runtime) = runtime
            && needs_watcher
        {
            self.watch(&runtime, handle, options.cancellation, timeout);
        }

        let args = match reference_codec::encode_for(&self.shared.objects, || encode_args(args)) {
            Ok(args) => args,
            Err(e) => {
                self.discard(handle);
                return CallFuture::ready(Err(CallError::Serialize(e)));
            }
        };

        let call = OutboundCall {
            handle,
            identifier,
            args: &args,
            target_instance_id: target,
        };
        match self.send_if_pending(&call, token.as_ref()) {
            Ok(true) => {
                tracing::debug!(%handle, identifier, "Call sent");
                CallFuture::pending(rx)
            }
            // Canceled or timed out before the send; nothing went out.
            Ok(false) => CallFuture::pending(rx),
            Err(source) => {
                tracing::warn!(%handle, identifier, "Failed to send call: {source}");
                self.discard(handle);
                CallFuture::ready(Err(CallError::Send { handle, source }))
            }
        }
    }

    fn register<T>(
        &self,
        handle: CallHandle,
        identifier: &str,
        tx: oneshot::Sender<Result<T, CallError>>,
    ) where
        T: DeserializeOwned + Send + 'static,
    {
        let owned_identifier = identifier.to_string();
        let settle: Settle = Box::new(move |settlement| {
            let outcome = match settlement {
                Settlement::Completed {
                    succeeded: true,
                    result,
                } => result
                    .decode::<T>()
                    .map_err(|e| CallError::undecodable(&owned_identifier, e)),
                Settlement::Completed {
                    succeeded: false,
                    result,
                } => Err(match result.decode_error() {
                    Ok(message) => CallError::remote(message.unwrap_or_default()),
                    Err(e) => CallError::undecodable(&owned_identifier, e),
                }),
                Settlement::Canceled(reason) => Err(CallError::Canceled(reason)),
                Settlement::Disconnected(reason) => Err(CallError::Disconnected(reason)),
            };
            // The caller may have dropped the future; nobody is left to tell.
            let _ = tx.send(outcome);
        });

        let call = PendingCall {
            identifier: identifier.to_string(),
            settle,
            watcher: None,
        };
        let previous = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, call);
        assert!(previous.is_none(), "call handle {handle} allocated twice");
    }

    /// Race the token against the timeout; the first to fire cancels the call.
    fn watch(
        &self,
        runtime: &tokio::runtime::Handle,
        handle: CallHandle,
        token: Option<CancellationToken>,
        timeout: Option<Duration>,
    ) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = runtime.spawn(async move {
            let reason = tokio::select! {
                () = cancelled(token.as_ref()) => CancelReason::Token,
                () = expired(timeout) => CancelReason::Timeout(timeout.unwrap_or_default()),
            };
            if let Some(shared) = shared.upgrade() {
                shared.cancel(handle, reason);
            }
        });

        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(&handle) {
            Some(call) => call.watcher = Some(task.abort_handle()),
            None => task.abort(),
        }
    }

    /// Hand `call` to the transport unless it was already settled or its
    /// token has fired.
    ///
    /// The pending table stays locked across the send, so a cancellation
    /// either removes the entry first and nothing is sent, or settles the call
    /// after the send. A transport must therefore not call back into the
    /// dispatcher from `begin_invoke`.
    fn send_if_pending(
        &self,
        call: &OutboundCall<'_>,
        token: Option<&CancellationToken>,
    ) -> Result<bool, TransportError> {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !pending.contains_key(&call.handle) {
            return Ok(false);
        }
        if token.is_some_and(CancellationToken::is_cancelled) {
            // The watcher has not run yet; settle here instead.
            let canceled = pending.remove(&call.handle);
            drop(pending);
            if let Some(canceled) = canceled {
                tracing::debug!(handle = %call.handle, identifier = call.identifier, "Call canceled before send");
                canceled.settle(Settlement::Canceled(CancelReason::Token));
            }
            return Ok(false);
        }
        self.shared.transport.begin_invoke(call).map(|()| true)
    }

    /// Drop an entry without settling it; its future is answered by the caller.
    fn discard(&self, handle: CallHandle) {
        if let Some(call) = self.shared.take(handle)
            && let Some(watcher) = call.watcher
        {
            watcher.abort();
        }
    }

    /// Deliver the completion message for `handle`.
    ///
    /// Returns `false` when the handle is unknown or already settled; such
    /// messages are dropped.
    pub fn complete(&self, handle: CallHandle, succeeded: bool, result: DeferredResult) -> bool {
        let Some(call) = self.shared.take(handle) else {
            tracing::trace!(%handle, succeeded, "Completion for unknown or settled call dropped");
            return false;
        };
        tracing::debug!(%handle, identifier = %call.identifier, succeeded, "Call completed");
        call.settle(Settlement::Completed { succeeded, result });
        true
    }

    /// Fail every pending call, e.g. because the script engine went away.
    pub fn disconnect(&self, reason: &str) -> usize {
        let drained: Vec<(CallHandle, PendingCall)> = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let count = drained.len();
        if count > 0 {
            tracing::info!(count, reason, "Failing pending calls");
        }
        for (_, call) in drained {
            call.settle(Settlement::Disconnected(reason.to_string()));
        }
        count
    }

    /// Report the result of a call the script engine made into the host.
    ///
    /// Failures are passed through the configured [`ErrorSanitizer`] first.
    /// Fire-and-forget calls (no call id) send nothing.
    pub fn complete_inbound(
        &self,
        info: &InvocationInfo,
        result: InvocationResult,
    ) -> Result<(), TransportError> {
        match inbound::completion_for(info, result, self.shared.sanitizer.as_ref()) {
            Some(completion) => self.shared.transport.end_invoke(&completion),
            None => Ok(()),
        }
    }
}

fn encode_args<A: Serialize + ?Sized>(args: &A) -> Result<Box<RawValue>, serde_json::Error> {
    let value = match serde_json::to_value(args)? {
        array @ serde_json::Value::Array(_) => array,
        serde_json::Value::Null => serde_json::Value::Array(Vec::new()),
        single => serde_json::Value::Array(vec![single]),
    };
    serde_json::value::to_raw_value(&value)
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn expired(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// The caller's view of an outbound call.
///
/// Resolves with the decoded result, or the [`CallError`] that settled it.
/// Dropping the future does not cancel the call.
pub struct CallFuture<T> {
    state: CallState<T>,
}

enum CallState<T> {
    Ready(Option<Result<T, CallError>>),
    Waiting(oneshot::Receiver<Result<T, CallError>>),
}

impl<T> CallFuture<T> {
    fn ready(outcome: Result<T, CallError>) -> Self {
        Self {
            state: CallState::Ready(Some(outcome)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<T, CallError>>) -> Self {
        Self {
            state: CallState::Waiting(rx),
        }
    }
}

// The outcome is only moved out, never pinned.
impl<T> Unpin for CallFuture<T> {}

impl<T> Future for CallFuture<T> {
    type Output = Result<T, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CallState::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(CallError::Abandoned)))
            }
            CallState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CallError::Abandoned))),
        }
    }
}
