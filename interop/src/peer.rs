//! Script engine peer: a child process speaking framed JSON over stdio.
//!
//! A writer task drains an mpsc queue of encoded frames into the engine's
//! stdin. A reader task parses frames from its stdout: completions go straight
//! to [`Dispatcher::complete`], inbound invocations are surfaced as
//! [`PeerEvent`]s for the integrator to execute.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use ferry_types::InvocationInfo;

use crate::config::{EngineConfig, InteropConfig};
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;
use crate::frame::{FrameReader, FrameWriter};
use crate::transport::{InboundCompletion, OutboundCall, Transport};
use crate::wire::{self, IncomingFrame, OutgoingFrame};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

const EVENT_CHANNEL_CAPACITY: usize = 256;

enum WriterCommand {
    Send(Vec<u8>),
    Shutdown,
}

/// Why the engine connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerStopReason {
    /// The engine closed its output.
    Exited,
    /// Reading from the engine failed.
    Failed(String),
}

/// Something the engine did that the integrator must handle.
#[derive(Debug)]
pub enum PeerEvent {
    /// The engine called into the host. Execute it and report back through
    /// [`Dispatcher::complete_inbound`].
    Invocation {
        info: InvocationInfo,
        args: Box<RawValue>,
    },
    /// The connection is gone; every pending call has been failed.
    Stopped { reason: PeerStopReason },
}

/// [`Transport`] that queues frames for the writer task without waiting.
pub struct PeerTransport {
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl PeerTransport {
    fn enqueue(&self, frame: &OutgoingFrame<'_>) -> Result<(), TransportError> {
        let bytes = frame.to_bytes().map_err(TransportError::Encode)?;
        self.writer_tx
            .try_send(WriterCommand::Send(bytes))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Backpressure,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }
}

impl Transport for PeerTransport {
    fn begin_invoke(&self, call: &OutboundCall<'_>) -> Result<(), TransportError> {
        self.enqueue(&OutgoingFrame::BeginInvoke(call))
    }

    fn end_invoke(&self, completion: &InboundCompletion) -> Result<(), TransportError> {
        self.enqueue(&OutgoingFrame::EndInvoke(completion))
    }
}

/// A dispatcher wired to a framed byte stream.
pub struct PeerConnection {
    dispatcher: Dispatcher,
    writer_tx: mpsc::Sender<WriterCommand>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl PeerConnection {
    /// Start the reader and writer tasks. Must be called inside a Tokio runtime.
    pub fn open<R, W>(
        name: &str,
        reader: R,
        writer: W,
        config: &InteropConfig,
    ) -> (Self, mpsc::Receiver<PeerEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        let writer_name = name.to_string();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Engine '{writer_name}' write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let transport = PeerTransport {
            writer_tx: writer_tx.clone(),
        };
        let dispatcher = Dispatcher::from_config(Arc::new(transport), config);

        let reader_dispatcher = dispatcher.clone();
        let reader_name = name.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(body)) => {
                        Self::dispatch_frame(&body, &reader_dispatcher, &event_tx).await;
                    }
                    Ok(None) => {
                        tracing::info!("Engine '{reader_name}' closed its output");
                        break PeerStopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!("Engine '{reader_name}' read error: {e:#}");
                        break PeerStopReason::Failed(e.to_string());
                    }
                }
            };
            reader_dispatcher.disconnect(&format!("engine '{reader_name}' stopped"));
            let _ = event_tx.send(PeerEvent::Stopped { reason }).await;
        });

        (
            Self {
                dispatcher,
                writer_tx,
                reader_handle,
                writer_handle,
            },
            event_rx,
        )
    }

    async fn dispatch_frame(body: &[u8], dispatcher: &Dispatcher, event_tx: &mpsc::Sender<PeerEvent>) {
        match wire::parse_incoming(body) {
            Some(IncomingFrame::Completion {
                handle,
                succeeded,
                result,
            }) => {
                dispatcher.complete(handle, succeeded, result);
            }
            Some(IncomingFrame::Invocation { info, args }) => {
                if let Err(mpsc::error::SendError(event)) =
                    event_tx.send(PeerEvent::Invocation { info, args }).await
                    && let PeerEvent::Invocation { info, .. } = event
                {
                    // Nobody is listening for inbound calls; answer instead of
                    // leaving the engine waiting.
                    let refusal = anyhow::anyhow!("no handler for inbound calls");
                    if let Err(e) = dispatcher.complete_inbound(&info, Err(refusal)) {
                        tracing::debug!("Could not refuse inbound call: {e}");
                    }
                }
            }
            None => {}
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the writer after it flushes what is already queued, then stop
    /// reading. Calls still pending fail with `Disconnected`.
    pub async fn close(mut self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        let _ = (&mut self.writer_handle).await;
        self.reader_handle.abort();
        self.dispatcher.disconnect("connection closed");
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// A spawned script engine process.
pub struct ScriptPeer {
    name: String,
    child: Child,
    connection: PeerConnection,
}

impl ScriptPeer {
    /// Spawn the configured engine and connect a dispatcher to its stdio.
    pub fn spawn(
        name: &str,
        engine: &EngineConfig,
        config: &InteropConfig,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>)> {
        let resolved_cmd = which::which(engine.command())
            .with_context(|| format!("{} not found in PATH", engine.command()))?;
        let mut child = Command::new(&resolved_cmd)
            .args(engine.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", engine.command()))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        tracing::info!(engine = name, command = %resolved_cmd.display(), "Engine started");
        let (connection, events) = PeerConnection::open(name, stdout, stdin, config);

        Ok((
            Self {
                name: name.to_string(),
                child,
                connection,
            },
            events,
        ))
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        self.connection.dispatcher()
    }

    /// Close stdin, give the engine a moment to exit, then kill it.
    pub async fn shutdown(mut self) {
        self.connection.close().await;

        let exited = tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await;
        if exited.is_err() {
            tracing::debug!("Engine '{}' didn't exit in time, killing", self.name);
            let _ = self.child.kill().await;
        }
    }
}
