//! Overlay boundary
//!
//! The relay only needs to join a topic, read its messages and publish to
//! it. Any gossip implementation can sit behind these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use beacon_core::BeaconResult;

/// Overlay identity of a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// One message received on a topic
#[derive(Clone, Debug)]
pub struct GossipMessage {
    pub from: PeerId,
    pub data: Bytes,
}

/// Pub/sub overlay
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    async fn join(&self, topic: &str) -> BeaconResult<Arc<dyn Topic>>;
}

/// Joined topic handle
#[async_trait]
pub trait Topic: Send + Sync {
    fn name(&self) -> &str;

    async fn subscribe(&self) -> BeaconResult<Box<dyn Subscription>>;

    async fn publish(&self, data: Bytes) -> BeaconResult<()>;

    /// Release the handle; publishing afterwards fails
    fn close(&self);
}

/// Message feed of one topic subscription
#[async_trait]
pub trait Subscription: Send {
    /// Next message. `BeaconError::StreamClosed` means the overlay is gone
    /// and no further messages will arrive; other errors are transient.
    async fn next(&mut self) -> BeaconResult<GossipMessage>;

    fn cancel(&mut self);
}
