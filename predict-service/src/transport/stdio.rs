//! Newline-delimited messages on stdin and stdout.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};

use super::{Publisher, Subscriber, TransportError};

pub struct StdinSubscriber {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinSubscriber {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscriber for StdinSubscriber {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        // Blank lines are not messages
        while let Some(line) = self.lines.next_line().await? {
            if !line.trim().is_empty() {
                return Ok(Some(line.into_bytes()));
            }
        }
        Ok(None)
    }
}

pub struct StdoutPublisher {
    out: Stdout,
}

impl StdoutPublisher {
    pub fn new() -> Self {
        Self {
            out: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for StdoutPublisher {
    async fn publish(&mut self, mut payload: Vec<u8>) -> Result<(), TransportError> {
        payload.push(b'\n');
        self.out.write_all(&payload).await?;
        self.out.flush().await?;
        Ok(())
    }
}
