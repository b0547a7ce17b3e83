//! Message queues for inter-component communication.
//!
//! Provides both point-to-point (Queue) and broadcast (BroadcastQueue) messaging.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{NodeflowError, Result};

/// MPMC (multi-producer, multi-consumer) queue.
///
/// Used where messages should be consumed by exactly one receiver.
/// Backed by flume.
#[derive(Clone)]
pub struct Queue<T> {
    receiver: Arc<flume::Receiver<T>>,
    sender: Arc<flume::Sender<T>>,
}

impl<T> Queue<T> {
    /// create a queue without a capacity bound
    pub fn unbounded() -> Arc<Self> {
        let (tx, rx) = flume::unbounded();

        Arc::new(Self {
            receiver: Arc::new(rx),
            sender: Arc::new(tx),
        })
    }

    /// send a message; fails only once every receiver is gone
    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.send(msg).map_err(|e| NodeflowError::Queue(e.to_string()))
    }

    /// receive a message from the queue asynchronously
    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }
}

/// Broadcast queue for one-to-many message distribution.
///
/// Every subscriber receives every message sent after it subscribed.
/// Backed by tokio's broadcast channel.
#[derive(Clone)]
pub struct BroadcastQueue<T> {
    sender: Arc<broadcast::Sender<T>>,
}

impl<T: Clone> BroadcastQueue<T> {
    /// create a new broadcast queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(cap);

        Arc::new(Self {
            sender: Arc::new(tx),
        })
    }

    /// send a message; having no subscribers is not an error
    pub fn send(
        &self,
        msg: T,
    ) {
        let _ = self.sender.send(msg);
    }

    /// subscribe to the queue
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::{BroadcastQueue, Queue};

    #[tokio::test]
    async fn test_queue_roundtrip() {
        let queue = Queue::unbounded();
        queue.send(7u32).unwrap();
        assert_eq!(queue.next_async().await, Some(7));
    }

    #[tokio::test]
    async fn test_unbounded_queue_keeps_every_message() {
        let queue = Queue::unbounded();
        for i in 0..500u32 {
            queue.send(i).unwrap();
        }
        for i in 0..500u32 {
            assert_eq!(queue.next_async().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let queue = BroadcastQueue::new(4);
        let mut a = queue.subscribe();
        let mut b = queue.subscribe();
        queue.send("hi".to_string());
        assert_eq!(a.recv().await.unwrap(), "hi");
        assert_eq!(b.recv().await.unwrap(), "hi");
    }
}
