//! Message transports
//!
//! The broker itself lives outside this process. These adapters only move
//! opaque message payloads in and out of the pipeline:
//!
//! - `-` / `stdio`: newline-delimited messages on stdin and stdout
//! - `tcp://host:port/topic`: length-prefixed frames over TCP
//! - [`memory::channel`]: in-process channels for tests and embedding

pub mod memory;
pub mod stdio;
pub mod tcp;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Errors raised by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid topic address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to {0} failed after timeout")]
    ConnectionTimeout(String),

    #[error("Frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("Channel closed")]
    Closed,

    #[error("Broker closed the subscription")]
    BrokerClosed,
}

/// Source of inbound messages
#[async_trait]
pub trait Subscriber: Send {
    /// Next message payload, or `None` once the stream has ended.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Sink for outbound messages
#[async_trait]
pub trait Publisher: Send {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Parsed topic address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicAddr {
    Stdio,
    Tcp { addr: String, topic: String },
}

impl FromStr for TopicAddr {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TransportError::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        if s == "-" || s.eq_ignore_ascii_case("stdio") {
            return Ok(Self::Stdio);
        }

        let url = Url::parse(s).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "tcp" {
            return Err(invalid("expected `-`, `stdio` or a tcp:// address"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url.port().ok_or_else(|| invalid("missing port"))?;
        let topic = url.path().trim_start_matches('/');
        if topic.is_empty() {
            return Err(invalid("missing topic name"));
        }

        Ok(Self::Tcp {
            addr: format!("{host}:{port}"),
            topic: topic.to_string(),
        })
    }
}

impl fmt::Display for TopicAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Tcp { addr, topic } => write!(f, "tcp://{addr}/{topic}"),
        }
    }
}

/// Open a subscription on `addr`.
pub async fn subscribe(addr: &TopicAddr) -> Result<Box<dyn Subscriber>, TransportError> {
    match addr {
        TopicAddr::Stdio => Ok(Box::new(stdio::StdinSubscriber::new())),
        TopicAddr::Tcp { addr, topic } => Ok(Box::new(tcp::subscribe(addr, topic).await?)),
    }
}

/// Open a publisher on `addr`.
pub async fn publisher(addr: &TopicAddr) -> Result<Box<dyn Publisher>, TransportError> {
    match addr {
        TopicAddr::Stdio => Ok(Box::new(stdio::StdoutPublisher::new())),
        TopicAddr::Tcp { addr, topic } => Ok(Box::new(tcp::publisher(addr, topic).await?)),
    }
}
