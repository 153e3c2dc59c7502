//! Outbound side of the handshake.
//!
//! One call, one connection: connect, write a frame, read one response,
//! close. The shipper uses it to submit, the bridge uses it to forward and to
//! notify originators, and operators use it to query.

use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::RelayConfig;
use super::forward::RetryPolicy;
use crate::wire::{ErrorCode, FrameCodec, FramingError, RelayMessage, RelayResponse};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("peer rejected the message: {code}: {message}")]
    Rejected { code: ErrorCode, message: String },
}

impl ClientError {
    /// Whether trying again could plausibly change the answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Rejected { code, .. } => code.is_retryable(),
            _ => true,
        }
    }
}

/// Sends one message per connection.
#[derive(Debug, Clone)]
pub struct RelayClient {
    codec: FrameCodec,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl RelayClient {
    pub fn new(codec: FrameCodec, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            codec,
            connect_timeout,
            io_timeout,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            FrameCodec::new(config.max_frame_bytes),
            config.connect_timeout,
            config.io_timeout,
        )
    }

    /// Send `message` to `addr` and return whatever the peer answered,
    /// ACK or NACK.
    pub async fn send(&self, addr: &str, message: &RelayMessage) -> Result<RelayResponse, ClientError> {
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))?
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        self.codec
            .write_frame(&mut stream, message, self.io_timeout)
            .await?;
        let response: RelayResponse = self.codec.read_frame(&mut stream, self.io_timeout).await?;
        Ok(response)
    }

    /// Like [`send`](Self::send), but a NACK comes back as an error.
    pub async fn send_expect_ack(
        &self,
        addr: &str,
        message: &RelayMessage,
    ) -> Result<RelayResponse, ClientError> {
        let response = self.send(addr, message).await?;
        if response.is_ack() {
            Ok(response)
        } else {
            Err(ClientError::Rejected {
                code: response.code.unwrap_or(ErrorCode::InvalidRequest),
                message: response.message,
            })
        }
    }

    /// Re-send until ACK, a non-retryable NACK, or the policy runs out.
    ///
    /// `on_failure(attempt, error)` runs after every failed attempt, before
    /// the backoff sleep.
    pub async fn send_with_retry<F>(
        &self,
        addr: &str,
        message: &RelayMessage,
        policy: &RetryPolicy,
        mut on_failure: F,
    ) -> Result<RelayResponse, (u32, ClientError)>
    where
        F: FnMut(u32, &ClientError),
    {
        let mut attempt = 1;
        loop {
            match self.send_expect_ack(addr, message).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    on_failure(attempt, &e);
                    if !e.is_retryable() || attempt >= policy.max_attempts {
                        return Err((attempt, e));
                    }
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Shipper convenience: submit with retry and log each failure.
    pub async fn submit_with_retry(
        &self,
        addr: &str,
        message: &RelayMessage,
        policy: &RetryPolicy,
    ) -> Result<RelayResponse, ClientError> {
        let tx_id = message.transaction_id().to_string();
        self.send_with_retry(addr, message, policy, |attempt, e| {
            tracing::warn!(
                tx_id = %tx_id,
                attempt,
                max = policy.max_attempts,
                error = %e,
                "submission attempt failed"
            );
        })
        .await
        .map_err(|(_, e)| e)
    }
}
