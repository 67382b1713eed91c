// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated WebSocket connections.
//!
//! The handshake is the pipeline request: a 401/403 answer triggers the
//! usual refresh and one retry. [`SocketConnector::supervise`] keeps a
//! connection alive across drops and token changes.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::pipeline::{Attempt, AuthPipeline, PendingRequest, RequestFailure};

pub type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Initial backoff for reconnection attempts.
const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
/// Maximum backoff for reconnection attempts.
const RECONNECT_MAX: Duration = Duration::from_secs(30);
/// Buffered frames before the reader stalls.
const FRAME_BUFFER: usize = 256;

/// Opens authenticated sockets to `{base}{path}?token=...`.
#[derive(Clone)]
pub struct SocketConnector {
    base_url: String,
    path: String,
    pipeline: AuthPipeline,
}

impl SocketConnector {
    pub fn new(base_url: &str, path: &str, pipeline: AuthPipeline) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            path: path.to_owned(),
            pipeline,
        }
    }

    /// Socket URL for `token`: the HTTP base with a ws scheme.
    pub fn socket_url(&self, token: &str) -> anyhow::Result<String> {
        let http_url = super::join_url(&self.base_url, &self.path);
        let ws_url = if let Some(rest) = http_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = http_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            http_url
        };
        super::authorized_url(&ws_url, token)
    }

    /// Perform one authenticated handshake.
    pub async fn connect(&self) -> Result<SocketStream, SessionError> {
        self.pipeline.submit(&Handshake { connector: self }).await
    }

    /// Keep a connection open in the background, forwarding text frames.
    ///
    /// Reconnects with backoff when the socket drops, immediately when the
    /// session is re-established, and stops when the session is lost or
    /// `cancel` fires.
    pub fn supervise(
        &self,
        events: broadcast::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) -> SocketSupervisor {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let connector = self.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_supervisor(connector, frame_tx, events, task_cancel).await;
        });
        SocketSupervisor { frames: frame_rx, cancel, handle }
    }
}

struct Handshake<'a> {
    connector: &'a SocketConnector,
}

#[async_trait]
impl PendingRequest for Handshake<'_> {
    type Output = SocketStream;

    async fn execute(
        &self,
        access_token: &str,
        attempt: Attempt,
    ) -> Result<SocketStream, RequestFailure> {
        let url = self.connector.socket_url(access_token)?;
        debug!(path = %self.connector.path, ?attempt, "socket handshake");
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => Ok(ws),
            Err(tungstenite::Error::Http(resp))
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                Err(RequestFailure::Unauthorized(format!(
                    "socket handshake rejected: HTTP {}",
                    resp.status().as_u16()
                )))
            }
            Err(e) => Err(anyhow::anyhow!("WS connect failed: {e}").into()),
        }
    }
}

/// Handle on a supervised connection.
pub struct SocketSupervisor {
    frames: mpsc::Receiver<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SocketSupervisor {
    /// Next text frame. `None` once the supervisor has stopped.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the supervisor task to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

enum StreamEnd {
    /// Stop supervising.
    Stop,
    /// Reconnect now with the current token.
    Reconnect,
    /// The socket dropped; reconnect after backoff.
    Dropped(String),
}

async fn run_supervisor(
    connector: SocketConnector,
    frame_tx: mpsc::Sender<String>,
    mut events: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = RECONNECT_INITIAL;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = cancel.cancelled() => return,
        };
        match connected {
            Ok(ws) => {
                info!(path = %connector.path, "socket connected");
                backoff = RECONNECT_INITIAL;
                // A refresh during the handshake already produced this token.
                if drain_events(&mut events) {
                    return;
                }
                match stream_frames(ws, &frame_tx, &mut events, &cancel).await {
                    StreamEnd::Stop => return,
                    StreamEnd::Reconnect => continue,
                    StreamEnd::Dropped(e) => warn!(err = %e, "socket disconnected"),
                }
            }
            Err(e) if e.is_session_lost() => {
                info!(reason = %e, "session lost, socket supervisor stopping");
                return;
            }
            Err(e) => warn!(err = %e, "socket connect failed"),
        }

        // Backoff before reconnect; a fresh session skips the wait.
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Established) => backoff = RECONNECT_INITIAL,
                Ok(SessionEvent::Lost { reason }) => {
                    info!(%reason, "session lost, socket supervisor stopping");
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = cancel.cancelled() => return,
        }
    }
}

/// Discard queued events. Returns true if the last one was a session loss.
fn drain_events(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
    let mut lost = false;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Lost { .. }) => lost = true,
            Ok(SessionEvent::Established) => lost = false,
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(broadcast::error::TryRecvError::Empty) => return lost,
            Err(broadcast::error::TryRecvError::Closed) => return true,
        }
    }
}

async fn stream_frames(
    ws: SocketStream,
    frame_tx: &mpsc::Sender<String>,
    events: &mut broadcast::Receiver<SessionEvent>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let (mut write, mut read) = ws.split();

    let end = loop {
        tokio::select! {
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => break StreamEnd::Dropped(format!("WS read error: {e}")),
                    None => break StreamEnd::Dropped("WS stream ended".to_owned()),
                };
                if let Message::Text(text) = msg {
                    if frame_tx.send(text.as_str().to_owned()).await.is_err() {
                        break StreamEnd::Stop;
                    }
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Established) => {
                    debug!("session re-established, reconnecting socket");
                    break StreamEnd::Reconnect;
                }
                Ok(SessionEvent::Lost { reason }) => {
                    info!(%reason, "session lost, closing socket");
                    break StreamEnd::Stop;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break StreamEnd::Stop,
            },
            _ = cancel.cancelled() => break StreamEnd::Stop,
        }
    };

    if !matches!(end, StreamEnd::Dropped(_)) {
        let _ = write.send(Message::Close(None)).await;
    }
    end
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
