//! Round cache in front of any `Client`

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_core::{Beacon, BeaconReceiver, BeaconResult, Client};

use crate::arc::ArcCache;

/// Queue depth between the inner watch and the caching forwarder
const WATCH_FORWARD_BUFFER: usize = 5;

/// Client that serves repeated point lookups from an ARC cache.
///
/// Entries are keyed by the round that was *requested*. A `get(0)` that
/// resolves to the latest round is stored under key 0, so a later lookup of
/// that round by number still reaches the inner client once.
pub struct CachingClient<C> {
    inner: Arc<C>,
    cache: Arc<ArcCache<u64, Beacon>>,
}

impl<C: Client> CachingClient<C> {
    /// Wrap `inner` with a cache of `size` entries
    pub fn new(inner: C, size: usize) -> BeaconResult<Self> {
        Ok(CachingClient {
            inner: Arc::new(inner),
            cache: Arc::new(ArcCache::new(size)?),
        })
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Number of cached rounds
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, round: u64) -> bool {
        self.cache.contains(&round)
    }
}

#[async_trait]
impl<C: Client> Client for CachingClient<C> {
    async fn get(&self, round: u64) -> BeaconResult<Beacon> {
        if let Some(beacon) = self.cache.get(&round) {
            return Ok(beacon);
        }

        let beacon = self.inner.get(round).await?;
        self.cache.insert(round, beacon.clone());
        Ok(beacon)
    }

    fn watch(&self, cancel: CancellationToken) -> BeaconReceiver {
        let mut upstream = self.inner.watch(cancel.clone());
        let cache = Arc::clone(&self.cache);
        let (tx, rx) = mpsc::channel(WATCH_FORWARD_BUFFER);

        tokio::spawn(async move {
            loop {
                let beacon = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = upstream.recv() => match next {
                        Some(beacon) => beacon,
                        None => break,
                    },
                };

                cache.insert(beacon.round, beacon.clone());
                if tx.send(beacon).await.is_err() {
                    break;
                }
            }
            tracing::debug!("caching watch forwarder stopped");
        });

        rx
    }
}
