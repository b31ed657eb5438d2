//! Per-connection request/response loop.
//!
//! A [`ConnectionHandler`] owns one accepted stream and serves it strictly
//! sequentially: read one frame, dispatch it, write one response, repeat.
//! Bad messages and failing handlers produce failure responses and keep
//! the connection open; only transport or framing errors end it early.

use crate::activity::{ActivityGuard, ActivityState};
use crate::backend::{Backend, HandlerError};
use crate::operation::{self, Operation};
use crate::protocol::{write_frame, FrameError, FrameReader, Request, Response};
use crate::registry::Registration;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, trace, warn};

/// Message sent when a handler fails for a reason the client must not see.
pub const INTERNAL_ERROR: &str = "Internal server error";

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub max_frame_len: usize,
    pub read_timeout: Option<Duration>,
}

/// A single client connection: the stream, its framing and whether it is
/// still open.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    reader: FrameReader,
    read_timeout: Option<Duration>,
    open: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, settings: ConnectionSettings) -> Self {
        Connection {
            stream,
            reader: FrameReader::new(settings.max_frame_len),
            read_timeout: settings.read_timeout,
            open: true,
        }
    }

    /// Read the next frame body, honoring the read deadline if any.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        match self.read_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.reader.read_frame(&mut self.stream))
                .await
                .map_err(|_| FrameError::TimedOut)?,
            None => self.reader.read_frame(&mut self.stream).await,
        }
    }

    pub async fn write_response(&mut self, response: &Response) -> Result<(), FrameError> {
        let frame = response.encode()?;
        write_frame(&mut self.stream, &frame).await
    }

    /// Shut the stream down. Only the first call has any effect.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Error shutting down stream");
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Whether the loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Drives one connection from accept to teardown.
pub struct ConnectionHandler<S> {
    conn: Connection<S>,
    peer: SocketAddr,
    backend: Arc<dyn Backend>,
    activity: ActivityGuard,
    registration: Option<Registration>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a handler and count it as a live connection.
    pub fn new(
        stream: S,
        peer: SocketAddr,
        backend: Arc<dyn Backend>,
        activity: &Arc<ActivityState>,
        settings: ConnectionSettings,
    ) -> Self {
        let activity = activity.connection_started();
        info!(peer = %peer, active = activity.state().active(), "Client connected");
        ConnectionHandler {
            conn: Connection::new(stream, settings),
            peer,
            backend,
            activity,
            registration: None,
        }
    }

    /// Tie this handler to a registry slot, released when the handler ends.
    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Serve requests until disconnect or a connection-fatal error.
    pub async fn run(mut self) {
        loop {
            match self.serve_one().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "Connection error");
                    break;
                }
            }
        }

        self.conn.close().await;
        drop(self.registration.take());
        let remaining = self.activity.state().active().saturating_sub(1);
        drop(self.activity);
        info!(peer = %self.peer, active = remaining, "Client disconnected");
    }

    async fn serve_one(&mut self) -> Result<Flow, FrameError> {
        let Some(body) = self.conn.read_frame().await? else {
            trace!(peer = %self.peer, "Connection closed by client");
            return Ok(Flow::Stop);
        };

        let request = match Request::decode(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Malformed request");
                self.conn.write_response(&Response::malformed()).await?;
                return Ok(Flow::Continue);
            }
        };

        let operation = request.operation;
        trace!(
            peer = %self.peer,
            operation = operation.description(),
            read_only = operation.is_read(),
            "Processing request"
        );
        let response = self.dispatch(operation, request.payload).await;
        self.conn.write_response(&response).await?;

        if operation.is_disconnect() {
            debug!(peer = %self.peer, "Client requested disconnect");
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    /// Run the bound handler off the async workers and map its outcome.
    async fn dispatch(&self, op: Operation, payload: Option<String>) -> Response {
        let backend = Arc::clone(&self.backend);
        let outcome = tokio::task::spawn_blocking(move || {
            operation::dispatch(backend.as_ref(), op, payload.as_deref())
        })
        .await;

        match outcome {
            Ok(Ok(reply)) => {
                if op.is_modify() {
                    debug!(peer = %self.peer, operation = op.description(), "Update applied");
                }
                Response::ok(reply)
            }
            Ok(Err(HandlerError::Business(message))) => {
                warn!(peer = %self.peer, operation = op.description(), %message, "Request rejected");
                Response::failure(message)
            }
            Ok(Err(HandlerError::Internal(detail))) => {
                error!(peer = %self.peer, operation = op.description(), %detail, "Handler failed");
                Response::failure(INTERNAL_ERROR)
            }
            Err(e) => {
                error!(peer = %self.peer, operation = op.description(), error = %e, "Handler panicked");
                Response::failure(INTERNAL_ERROR)
            }
        }
    }
}
