//! Boundaries to the round-fetching collaborators
//!
//! `Client` is the consumer-side contract that the cache and aggregator both
//! wrap and implement. `PublicSource` is the node-facing contract the HTTP
//! server relays from.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Beacon, BeaconResult, GroupPacket};

/// Receiving half of a watch; ends when the watch is cancelled or its source shuts down
pub type BeaconReceiver = mpsc::Receiver<Beacon>;

/// Infinite stream of newly produced rounds. Ends or yields an error when
/// the connection fails; the caller reopens it.
pub type BeaconStream = BoxStream<'static, BeaconResult<Beacon>>;

/// Round source as seen by consumers
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Fetch exactly one round. Round 0 means the latest round.
    async fn get(&self, round: u64) -> BeaconResult<Beacon>;

    /// Stream new rounds as they are produced until `cancel` fires
    fn watch(&self, cancel: CancellationToken) -> BeaconReceiver;
}

/// Public API of an upstream beacon node
#[async_trait]
pub trait PublicSource: Send + Sync + 'static {
    /// Fetch exactly one round. Round 0 means the latest round.
    async fn public_rand(&self, round: u64) -> BeaconResult<Beacon>;

    async fn public_rand_stream(&self) -> BeaconResult<BeaconStream>;

    async fn group(&self) -> BeaconResult<GroupPacket>;
}

#[async_trait]
impl<C: Client + ?Sized> Client for Arc<C> {
    async fn get(&self, round: u64) -> BeaconResult<Beacon> {
        (**self).get(round).await
    }

    fn watch(&self, cancel: CancellationToken) -> BeaconReceiver {
        (**self).watch(cancel)
    }
}

#[async_trait]
impl<S: PublicSource + ?Sized> PublicSource for Arc<S> {
    async fn public_rand(&self, round: u64) -> BeaconResult<Beacon> {
        (**self).public_rand(round).await
    }

    async fn public_rand_stream(&self) -> BeaconResult<BeaconStream> {
        (**self).public_rand_stream().await
    }

    async fn group(&self) -> BeaconResult<GroupPacket> {
        (**self).group().await
    }
}
