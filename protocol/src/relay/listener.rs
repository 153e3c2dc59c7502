//! Inbound side of the handshake.
//!
//! One connection carries one transaction: read a frame, hand it to the
//! engine, write exactly one response, close. Every connection runs in its
//! own task so the accept loop never waits on a handler, and every read,
//! write, and handler run has a deadline.

use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use uuid::Uuid;

use super::engine::RelayEngine;
use super::error::RelayError;
use crate::storage::RelayStage;
use crate::wire::{FrameCodec, FramingError, RelayMessage, RelayResponse};

pub struct RelayListener {
    listener: TcpListener,
    engine: RelayEngine,
    codec: FrameCodec,
}

impl RelayListener {
    /// Bind `addr`. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str, engine: RelayEngine) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let codec = FrameCodec::new(engine.config().max_frame_bytes);
        Ok(Self {
            listener,
            engine,
            codec,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Connections already accepted keep running to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let local = self
            .listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        tracing::info!(
            addr = %local,
            node_id = %self.engine.config().node_id,
            role = self.engine.config().role.name(),
            "relay listener started"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let engine = self.engine.clone();
                            let codec = self.codec;
                            tokio::spawn(async move {
                                serve_connection(stream, peer, engine, codec).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(addr = %local, "relay listener shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: RelayEngine,
    codec: FrameCodec,
) {
    let started = Instant::now();
    let conn = Uuid::new_v4();
    let io_timeout = engine.config().io_timeout;

    let message: RelayMessage = match codec.read_frame(&mut stream, io_timeout).await {
        Ok(message) => message,
        Err(FramingError::ConnectionClosed) => {
            tracing::debug!(peer = %peer, conn = %conn, "peer closed before sending a frame");
            return;
        }
        Err(e) => {
            tracing::warn!(peer = %peer, conn = %conn, stage = %RelayStage::Failed, error = %e, "unreadable frame");
            let response = RelayError::Framing(e).to_response(None);
            reply(&mut stream, peer, &codec, &response, io_timeout).await;
            engine.observer().on_response("invalid", &response, started.elapsed());
            return;
        }
    };

    let kind = message.kind();
    let tx_id = message.transaction_id().to_string();
    tracing::debug!(peer = %peer, conn = %conn, tx_id = %tx_id, kind, "frame received");

    let response = match timeout(io_timeout, engine.handle(message)).await {
        Ok(response) => response,
        Err(_) => {
            // Whatever the handler had stored stays stored.
            tracing::error!(peer = %peer, conn = %conn, tx_id = %tx_id, kind, stage = %RelayStage::Failed, "handler timed out");
            RelayError::Timeout("handling").to_response(Some(tx_id.clone()))
        }
    };

    reply(&mut stream, peer, &codec, &response, io_timeout).await;
    engine.observer().on_response(kind, &response, started.elapsed());
    tracing::debug!(
        peer = %peer,
        conn = %conn,
        tx_id = %tx_id,
        kind,
        status = ?response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "connection done"
    );
}

async fn reply(
    stream: &mut TcpStream,
    peer: SocketAddr,
    codec: &FrameCodec,
    response: &RelayResponse,
    io_timeout: std::time::Duration,
) {
    if let Err(e) = codec.write_frame(stream, response, io_timeout).await {
        tracing::warn!(peer = %peer, error = %e, "could not write response");
    }
}
