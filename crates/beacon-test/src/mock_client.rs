//! Counting mock of the consumer-side `Client`

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use beacon_core::{Beacon, BeaconError, BeaconReceiver, BeaconResult, Client};

use crate::mock_beacon;

/// Mock client that counts every `get` reaching it.
///
/// `get(0)` resolves to the configured latest round. The watch stream is fed
/// by the sender returned from [`MockClient::with_watch`]; it can be taken by
/// one watcher only, later watches end immediately.
pub struct MockClient {
    latest: AtomicU64,
    calls: AtomicUsize,
    pending_failures: AtomicUsize,
    watch_rx: Mutex<Option<mpsc::Receiver<Beacon>>>,
}

impl MockClient {
    pub fn new(latest: u64) -> Self {
        MockClient {
            latest: AtomicU64::new(latest),
            calls: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            watch_rx: Mutex::new(None),
        }
    }

    /// Mock whose watch stream is driven by the returned sender
    pub fn with_watch(latest: u64, capacity: usize) -> (Self, mpsc::Sender<Beacon>) {
        let (tx, rx) = mpsc::channel(capacity);
        let client = MockClient::new(latest);
        *client.watch_rx.lock() = Some(rx);
        (client, tx)
    }

    /// Number of `get` calls that reached the mock
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls to `get` fail
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_latest(&self, round: u64) {
        self.latest.store(round, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Client for MockClient {
    async fn get(&self, round: u64) -> BeaconResult<Beacon> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(BeaconError::Upstream("injected failure".into()));
        }
        let round = if round == 0 {
            self.latest.load(Ordering::SeqCst)
        } else {
            round
        };
        Ok(mock_beacon(round))
    }

    fn watch(&self, cancel: CancellationToken) -> BeaconReceiver {
        let (tx, rx) = mpsc::channel(1);
        let Some(mut source) = self.watch_rx.lock().take() else {
            return rx;
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = source.recv() => {
                        let Some(beacon) = next else { break };
                        if tx.send(beacon).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }
}
