//! Length-prefixed frames over TCP
//!
//! # Protocol
//!
//! Every message is a 4-byte big-endian length followed by the payload.
//! The first frame a client sends is a JSON handshake naming its role:
//!
//! - `{"subscribe": "<topic>"}`: the broker then streams frames to us
//! - `{"publish": "<topic>"}`: every following frame we send is a message
//!
//! Broker topics never end on their own: a close between frames is reported
//! by the subscriber as [`TransportError::BrokerClosed`], and a close inside a
//! frame as an I/O error.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use super::{Publisher, Subscriber, TransportError};

/// Maximum time to wait for the broker to accept a connection (in milliseconds)
const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Interval between connection retry attempts (in milliseconds)
const CONNECTION_RETRY_INTERVAL_MS: u64 = 50;

/// Largest frame accepted from the broker
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + Send,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| TransportError::FrameTooLarge(payload.len()))?
        .to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, or `None` on a close between frames.
///
/// A close part-way through the header or payload is an I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Subscriber reading frames from any byte stream
pub struct FrameSubscriber<S> {
    stream: S,
}

impl<S> FrameSubscriber<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send the subscribe handshake and start reading frames.
    pub async fn handshake(mut stream: S, topic: &str) -> Result<Self, TransportError> {
        let hello = json!({ "subscribe": topic }).to_string();
        write_frame(&mut stream, hello.as_bytes()).await?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl<S> Subscriber for FrameSubscriber<S>
where
    S: AsyncRead + Unpin + Send,
{
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match read_frame(&mut self.stream).await? {
            Some(payload) => Ok(Some(payload)),
            None => Err(TransportError::BrokerClosed),
        }
    }
}

/// Publisher writing frames to any byte stream
pub struct FramePublisher<S> {
    stream: S,
}

impl<S> FramePublisher<S>
where
    S: AsyncWrite + Unpin + Send,
{
    /// Send the publish handshake.
    pub async fn handshake(mut stream: S, topic: &str) -> Result<Self, TransportError> {
        let hello = json!({ "publish": topic }).to_string();
        write_frame(&mut stream, hello.as_bytes()).await?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl<S> Publisher for FramePublisher<S>
where
    S: AsyncWrite + Unpin + Send,
{
    async fn publish(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        write_frame(&mut self.stream, &payload).await
    }
}

/// Connect to the broker at `addr` and subscribe to `topic`.
pub async fn subscribe(addr: &str, topic: &str) -> Result<FrameSubscriber<TcpStream>, TransportError> {
    let stream = connect_with_retry(addr).await?;
    info!(addr = %addr, topic = %topic, "Subscribed to topic");
    FrameSubscriber::handshake(stream, topic).await
}

/// Connect to the broker at `addr` and publish to `topic`.
pub async fn publisher(addr: &str, topic: &str) -> Result<FramePublisher<TcpStream>, TransportError> {
    let stream = connect_with_retry(addr).await?;
    info!(addr = %addr, topic = %topic, "Publishing to topic");
    FramePublisher::handshake(stream, topic).await
}

/// Attempt to connect to the broker with retries and timeout
async fn connect_with_retry(addr: &str) -> Result<TcpStream, TransportError> {
    let start = Instant::now();
    let timeout = Duration::from_millis(CONNECT_TIMEOUT_MS);
    let retry_interval = Duration::from_millis(CONNECTION_RETRY_INTERVAL_MS);

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                if start.elapsed() > timeout {
                    error!(
                        addr = %addr,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Connection timeout waiting for broker"
                    );
                    return Err(TransportError::ConnectionTimeout(addr.to_string()));
                }

                debug!(addr = %addr, error = %e, "Broker not ready, retrying...");
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
