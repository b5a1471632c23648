//! In-memory overlay
//!
//! A shared `MemoryNetwork` broker holds one broadcast channel per topic.
//! Every `MemoryPubSub` joined to it acts as one peer; a peer never receives
//! its own publications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use beacon_core::{BeaconError, BeaconResult};

use crate::{GossipMessage, PeerId, PubSub, Subscription, Topic};

const TOPIC_CAPACITY: usize = 256;

#[derive(Clone)]
struct TopicChannel {
    tx: broadcast::Sender<GossipMessage>,
    closed: CancellationToken,
}

/// Shared broker connecting `MemoryPubSub` peers
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    topics: Arc<Mutex<HashMap<String, TopicChannel>>>,
    peers: Arc<AtomicU64>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: &str) -> TopicChannel {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| TopicChannel {
                tx: broadcast::channel(TOPIC_CAPACITY).0,
                closed: CancellationToken::new(),
            })
            .clone()
    }

    /// Tear a topic down; its subscriptions report the overlay closed
    pub fn close_topic(&self, topic: &str) {
        if let Some(channel) = self.topics.lock().remove(topic) {
            channel.closed.cancel();
        }
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |channel| channel.tx.receiver_count())
    }
}

/// One peer on a `MemoryNetwork`
pub struct MemoryPubSub {
    peer: PeerId,
    network: MemoryNetwork,
}

impl MemoryPubSub {
    pub fn new(network: &MemoryNetwork) -> Self {
        let peer = PeerId(network.peers.fetch_add(1, Ordering::Relaxed) + 1);
        MemoryPubSub {
            peer,
            network: network.clone(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn join(&self, topic: &str) -> BeaconResult<Arc<dyn Topic>> {
        let channel = self.network.channel(topic);
        tracing::debug!(peer = %self.peer, topic, "joined memory topic");

        Ok(Arc::new(MemoryTopic {
            name: topic.to_string(),
            peer: self.peer,
            channel,
            released: AtomicBool::new(false),
        }))
    }
}

struct MemoryTopic {
    name: String,
    peer: PeerId,
    channel: TopicChannel,
    released: AtomicBool,
}

impl MemoryTopic {
    fn ensure_open(&self) -> BeaconResult<()> {
        if self.released.load(Ordering::SeqCst) || self.channel.closed.is_cancelled() {
            return Err(BeaconError::StreamClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self) -> BeaconResult<Box<dyn Subscription>> {
        self.ensure_open()?;
        Ok(Box::new(MemorySubscription {
            peer: self.peer,
            rx: Some(self.channel.tx.subscribe()),
            closed: self.channel.closed.clone(),
        }))
    }

    async fn publish(&self, data: Bytes) -> BeaconResult<()> {
        self.ensure_open()?;
        // No receivers is not an error: nobody is listening yet
        let _ = self.channel.tx.send(GossipMessage {
            from: self.peer,
            data,
        });
        Ok(())
    }

    fn close(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct MemorySubscription {
    peer: PeerId,
    rx: Option<broadcast::Receiver<GossipMessage>>,
    closed: CancellationToken,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> BeaconResult<GossipMessage> {
        let peer = self.peer;
        let rx = self.rx.as_mut().ok_or(BeaconError::StreamClosed)?;

        loop {
            let received = tokio::select! {
                _ = self.closed.cancelled() => return Err(BeaconError::StreamClosed),
                received = rx.recv() => received,
            };
            match received {
                Ok(msg) if msg.from == peer => continue,
                Ok(msg) => return Ok(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "memory subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BeaconError::StreamClosed),
            }
        }
    }

    fn cancel(&mut self) {
        self.rx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peers_exchange_messages() {
        let network = MemoryNetwork::new();
        let a = MemoryPubSub::new(&network);
        let b = MemoryPubSub::new(&network);

        let topic_a = a.join("t").await.unwrap();
        let topic_b = b.join("t").await.unwrap();
        let mut sub_a = topic_a.subscribe().await.unwrap();
        let mut sub_b = topic_b.subscribe().await.unwrap();

        topic_a.publish(Bytes::from_static(b"hello")).await.unwrap();
        topic_b.publish(Bytes::from_static(b"back")).await.unwrap();

        let at_b = sub_b.next().await.unwrap();
        assert_eq!(at_b.from, a.peer_id());
        assert_eq!(&at_b.data[..], b"hello");

        // Own publication is skipped
        let at_a = sub_a.next().await.unwrap();
        assert_eq!(&at_a.data[..], b"back");
    }

    #[tokio::test]
    async fn test_close_topic_ends_subscriptions() {
        let network = MemoryNetwork::new();
        let peer = MemoryPubSub::new(&network);
        let topic = peer.join("t").await.unwrap();
        let mut sub = topic.subscribe().await.unwrap();
        assert_eq!(network.subscriber_count("t"), 1);

        network.close_topic("t");
        assert_eq!(sub.next().await.unwrap_err(), BeaconError::StreamClosed);
        assert!(topic.publish(Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_released_handle_rejects_publish() {
        let network = MemoryNetwork::new();
        let peer = MemoryPubSub::new(&network);
        let topic = peer.join("t").await.unwrap();
        let mut sub = topic.subscribe().await.unwrap();

        topic.close();
        assert!(topic.publish(Bytes::new()).await.is_err());

        sub.cancel();
        assert!(sub.next().await.is_err());
    }
}
