//! In-process topic backed by a bounded tokio channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Publisher, Subscriber, TransportError};

/// Create a connected publisher/subscriber pair.
pub fn channel(capacity: usize) -> (MemoryPublisher, MemorySubscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MemoryPublisher { tx }, MemorySubscriber { rx })
}

#[derive(Clone)]
pub struct MemoryPublisher {
    tx: mpsc::Sender<Vec<u8>>,
}

pub struct MemorySubscriber {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(payload).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_then_ends() {
        let (mut tx, mut rx) = channel(4);
        tx.publish(b"one".to_vec()).await.unwrap();
        drop(tx);

        assert_eq!(rx.next_message().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(rx.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_to_dropped_subscriber_fails() {
        let (mut tx, rx) = channel(1);
        drop(rx);
        assert!(matches!(
            tx.publish(b"x".to_vec()).await,
            Err(TransportError::Closed)
        ));
    }
}
