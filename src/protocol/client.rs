//! Short-lived TCP client for the learning service.
//!
//! Every exchange opens its own connection, writes the frames, reads the
//! fixed-size response (if any) and shuts the socket down. Nothing is pooled.
//! A connect failure, timeout, cancellation or short read surfaces as an
//! error; callers decide on the fallback.

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::exchange::{decode_arm_index, decode_prediction, Exchange, Message};
use super::frame;
use crate::config::OntoConfig;
use crate::error::{OntoError, Result};

/// Client for one learning-service endpoint.
#[derive(Clone, Debug)]
pub struct ProtocolClient {
    addr: String,
    timeout: Option<Duration>,
}

impl ProtocolClient {
    /// Create a client for `host:port`. A zero `io_timeout_ms` waits forever.
    pub fn new(host: impl Into<String>, port: u16, io_timeout_ms: u64) -> Self {
        let host = host.into();
        let addr = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self {
            addr,
            timeout: (io_timeout_ms > 0).then(|| Duration::from_millis(io_timeout_ms)),
        }
    }

    pub fn from_config(config: &OntoConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.io_timeout_ms)
    }

    /// The `host:port` this client connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a query exchange and return the raw arm index the service chose.
    pub async fn select_arm(&self, message: Message, cancel: &CancellationToken) -> Result<u32> {
        debug_assert_eq!(message.exchange(), Exchange::Query);
        let response = self.exchange(message, cancel).await?;
        let bytes: [u8; 4] = response
            .as_slice()
            .try_into()
            .map_err(|_| OntoError::ShortResponse { expected: 4 })?;
        Ok(decode_arm_index(bytes))
    }

    /// Send a predict exchange and return the predicted latency.
    ///
    /// NaN means the service has no model yet.
    pub async fn predict(&self, message: Message, cancel: &CancellationToken) -> Result<f64> {
        debug_assert_eq!(message.exchange(), Exchange::Predict);
        let response = self.exchange(message, cancel).await?;
        let bytes: [u8; 8] = response
            .as_slice()
            .try_into()
            .map_err(|_| OntoError::ShortResponse { expected: 8 })?;
        Ok(decode_prediction(bytes))
    }

    /// Send a reward exchange. The service does not answer.
    pub async fn reward(&self, message: Message, cancel: &CancellationToken) -> Result<()> {
        debug_assert_eq!(message.exchange(), Exchange::Reward);
        self.exchange(message, cancel).await.map(|_| ())
    }

    /// Run one exchange under the configured timeout and `cancel`.
    ///
    /// Dropping the in-flight future on timeout or cancellation closes the
    /// socket.
    pub async fn exchange(&self, message: Message, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let kind = message.exchange().kind();
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run(message))
                    .await
                    .map_err(|_| OntoError::Timeout(limit.as_millis() as u64))?,
                None => self.run(message).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OntoError::Cancelled),
            result = bounded => result,
        };

        if let Err(ref err) = result {
            warn!(addr = %self.addr, exchange = kind, error = %err, "learning service exchange failed");
        }
        result
    }

    async fn run(&self, message: Message) -> Result<Vec<u8>> {
        let expected = message.exchange().response_len();
        let wire_len = message.wire_len();

        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;

        let mut framed = FramedWrite::new(stream, frame::codec());
        for payload in message.into_frames() {
            framed.feed(payload).await?;
        }
        SinkExt::<Bytes>::flush(&mut framed).await?;
        let mut stream = framed.into_inner();

        let mut response = vec![0u8; expected];
        let read = if expected > 0 {
            stream.read_exact(&mut response).await.map(|_| ())
        } else {
            Ok(())
        };

        if let Err(err) = stream.shutdown().await {
            debug!(addr = %self.addr, error = %err, "socket shutdown failed");
        }

        match read {
            Ok(()) => {
                debug!(addr = %self.addr, bytes_sent = wire_len, bytes_read = expected, "exchange complete");
                Ok(response)
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(OntoError::ShortResponse { expected })
            }
            Err(err) => Err(err.into()),
        }
    }
}
