//! Next-round synchronization
//!
//! `RoundSync` tracks the latest round seen on the upstream stream and the
//! requests parked for the round after it. The watcher publishes every
//! streamed round; parked requests are detached under the lock and released
//! after it, each with a single oneshot send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use beacon_core::{Beacon, BeaconError, BeaconResult, IdAllocator, PublicSource, WaiterId};

/// What a parked request is released with
#[derive(Clone, Debug)]
pub struct Delivery {
    pub round: u64,
    /// JSON body; empty when the round did not follow the previous one
    pub payload: Bytes,
}

struct SyncState {
    latest: u64,
    pending: HashMap<WaiterId, oneshot::Sender<Delivery>>,
}

/// Latest-round marker plus the table of parked requests
pub struct RoundSync {
    state: Mutex<SyncState>,
    ids: IdAllocator,
}

impl Default for RoundSync {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundSync {
    pub fn new() -> Self {
        RoundSync {
            state: Mutex::new(SyncState {
                latest: 0,
                pending: HashMap::new(),
            }),
            ids: IdAllocator::new(),
        }
    }

    /// Latest streamed round, 0 while not synchronized
    pub fn latest(&self) -> u64 {
        self.state.lock().latest
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Park a request for `round` if it is the next round to be produced.
    ///
    /// Returns `None` when the marker is unset or `round` is not
    /// `latest + 1`; the caller fetches directly instead.
    pub fn register(self: &Arc<Self>, round: u64) -> Option<Waiter> {
        let (tx, rx) = oneshot::channel();
        let id = self.ids.waiter();

        let mut state = self.state.lock();
        if state.latest == 0 || state.latest.checked_add(1) != Some(round) {
            return None;
        }
        state.pending.insert(id, tx);

        Some(Waiter {
            id,
            round,
            rx,
            sync: Arc::clone(self),
        })
    }

    /// Record a streamed round and release every parked request
    pub fn publish(&self, beacon: &Beacon) {
        let mut payload = match beacon.to_json() {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                tracing::warn!(round = beacon.round, error = %e, "failed to encode streamed round");
                Bytes::new()
            }
        };

        let pending = {
            let mut state = self.state.lock();
            if state.latest != 0 && state.latest.checked_add(1) != Some(beacon.round) {
                tracing::warn!(
                    expected = state.latest.saturating_add(1),
                    round = beacon.round,
                    "unexpected round on upstream stream"
                );
                payload = Bytes::new();
            }
            state.latest = beacon.round;
            std::mem::take(&mut state.pending)
        };

        for (_, waiter) in pending {
            let _ = waiter.send(Delivery {
                round: beacon.round,
                payload: payload.clone(),
            });
        }
    }

    /// Forget the marker; nothing is parked until the stream resynchronizes
    pub fn reset(&self) {
        self.state.lock().latest = 0;
    }

    /// Drop every parked request
    pub fn close(&self) {
        let pending = std::mem::take(&mut self.state.lock().pending);
        drop(pending);
    }
}

/// A parked request; deregisters itself when dropped
pub struct Waiter {
    id: WaiterId,
    round: u64,
    rx: oneshot::Receiver<Delivery>,
    sync: Arc<RoundSync>,
}

impl Waiter {
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Wait for the round to be streamed, at most `timeout`
    pub async fn wait(mut self, timeout: Duration) -> BeaconResult<Bytes> {
        let delivery = match tokio::time::timeout(timeout, &mut self.rx).await {
            Err(_) => return Err(BeaconError::Timeout(timeout)),
            Ok(Err(_)) => return Err(BeaconError::Cancelled),
            Ok(Ok(delivery)) => delivery,
        };

        if delivery.round != self.round || delivery.payload.is_empty() {
            return Err(BeaconError::EmptyPayload(self.round));
        }
        Ok(delivery.payload)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.sync.state.lock().pending.remove(&self.id);
    }
}

/// Feed `sync` from the upstream stream until `shutdown` fires.
///
/// A failed or finished stream resets the marker and is reopened after
/// `reconnect_delay`.
pub async fn run_watcher<S: PublicSource + ?Sized>(
    source: Arc<S>,
    sync: Arc<RoundSync>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
) {
    'reconnect: loop {
        let opened = tokio::select! {
            _ = shutdown.cancelled() => break,
            opened = source.public_rand_stream() => opened,
        };

        match opened {
            Ok(mut stream) => loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break 'reconnect,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(beacon)) => sync.publish(&beacon),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "random stream round failed");
                        break;
                    }
                    None => {
                        tracing::warn!("random stream ended");
                        break;
                    }
                }
            },
            Err(e) => tracing::warn!(error = %e, "failed to open random stream"),
        }

        sync.reset();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    sync.close();
    tracing::debug!("round watcher stopped");
}
