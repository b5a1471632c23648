//! Watch aggregation
//!
//! One upstream watch is shared by any number of downstream watchers. Each
//! watcher gets its own bounded queue and cancellation token; a watcher that
//! falls behind loses rounds instead of slowing the others down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use beacon_core::{Beacon, BeaconReceiver, BeaconResult, Client, IdAllocator, SubscriptionId};

/// Aggregator configuration
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Per-watcher queue capacity
    pub buffer: usize,
    /// Pause before reopening a finished upstream watch
    pub reconnect_delay: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            buffer: 5,
            reconnect_delay: Duration::from_millis(500),
        }
    }
}

/// Lifecycle of the shared upstream watch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamState {
    Disconnected,
    Streaming,
    Closed,
}

struct Subscriber {
    tx: mpsc::Sender<Beacon>,
    cancel: CancellationToken,
}

struct AggregatorState {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    latest: Option<Beacon>,
    upstream: UpstreamState,
    running: bool,
}

struct Shared {
    state: Mutex<AggregatorState>,
    ids: IdAllocator,
    shutdown: CancellationToken,
}

impl Shared {
    fn set_upstream(&self, upstream: UpstreamState) {
        let mut state = self.state.lock();
        if state.upstream != UpstreamState::Closed {
            state.upstream = upstream;
        }
    }

    fn remove(&self, id: SubscriptionId) {
        if self.state.lock().subscribers.remove(&id).is_some() {
            tracing::debug!(subscription = ?id, "watcher removed");
        }
    }

    fn close_all(&self) {
        let mut state = self.state.lock();
        state.upstream = UpstreamState::Closed;
        state.subscribers.clear();
    }

    fn dispatch(&self, beacon: Beacon) {
        let mut state = self.state.lock();
        if state.upstream == UpstreamState::Closed {
            return;
        }

        let newer = state
            .latest
            .as_ref()
            .map_or(true, |latest| beacon.round >= latest.round);
        if newer {
            state.latest = Some(beacon.clone());
        }

        state.subscribers.retain(|id, sub| {
            if sub.cancel.is_cancelled() {
                return false;
            }
            match sub.tx.try_send(beacon.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscription = ?id, round = beacon.round, "watcher queue full, dropping round");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Fans one upstream watch out to many independently cancellable watchers
pub struct WatchAggregator<C> {
    inner: Arc<C>,
    shared: Arc<Shared>,
    config: WatchConfig,
}

impl<C: Client> WatchAggregator<C> {
    pub fn new(inner: C) -> Self {
        Self::with_config(inner, WatchConfig::default())
    }

    pub fn with_config(inner: C, config: WatchConfig) -> Self {
        WatchAggregator {
            inner: Arc::new(inner),
            shared: Arc::new(Shared {
                state: Mutex::new(AggregatorState {
                    subscribers: HashMap::new(),
                    latest: None,
                    upstream: UpstreamState::Disconnected,
                    running: false,
                }),
                ids: IdAllocator::new(),
                shutdown: CancellationToken::new(),
            }),
            config,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn upstream_state(&self) -> UpstreamState {
        self.shared.state.lock().upstream
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Most recent round seen on the upstream watch
    pub fn latest(&self) -> Option<Beacon> {
        self.shared.state.lock().latest.clone()
    }

    /// Stop the upstream watch and end every watcher's queue
    pub fn close(&self) {
        self.shared.shutdown.cancel();
        self.shared.close_all();
    }
}

impl<C> Drop for WatchAggregator<C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl<C: Client> Client for WatchAggregator<C> {
    async fn get(&self, round: u64) -> BeaconResult<Beacon> {
        let latest = self.latest().filter(|latest| latest.round == round);
        match latest {
            Some(beacon) => Ok(beacon),
            None => self.inner.get(round).await,
        }
    }

    fn watch(&self, cancel: CancellationToken) -> BeaconReceiver {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let id = self.shared.ids.subscription();
        let liveness = tx.clone();

        let start = {
            let mut state = self.shared.state.lock();
            if state.upstream == UpstreamState::Closed {
                return rx;
            }
            state.subscribers.insert(
                id,
                Subscriber {
                    tx,
                    cancel: cancel.clone(),
                },
            );
            !std::mem::replace(&mut state.running, true)
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = shared.shutdown.cancelled() => {}
                _ = liveness.closed() => {}
            }
            drop(liveness);
            shared.remove(id);
        });

        if start {
            tokio::spawn(run_upstream(
                Arc::clone(&self.inner),
                Arc::clone(&self.shared),
                self.config.reconnect_delay,
            ));
        }

        rx
    }
}

async fn run_upstream<C: Client>(inner: Arc<C>, shared: Arc<Shared>, reconnect_delay: Duration) {
    loop {
        let connection = shared.shutdown.child_token();
        let mut upstream = inner.watch(connection.clone());
        shared.set_upstream(UpstreamState::Streaming);

        loop {
            tokio::select! {
                _ = shared.shutdown.cancelled() => {
                    shared.close_all();
                    return;
                }
                next = upstream.recv() => match next {
                    Some(beacon) => shared.dispatch(beacon),
                    None => break,
                },
            }
        }

        connection.cancel();
        shared.set_upstream(UpstreamState::Disconnected);
        tracing::warn!(delay = ?reconnect_delay, "upstream watch ended, reconnecting");

        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                shared.close_all();
                return;
            }
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use beacon_test::{mock_beacon, MockClient};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_fan_out_and_independent_cancel() {
        let (mock, feed) = MockClient::with_watch(1, 4);
        let agg = WatchAggregator::new(mock);

        let first_cancel = CancellationToken::new();
        let mut first = agg.watch(first_cancel.clone());
        let mut second = agg.watch(CancellationToken::new());
        assert_eq!(agg.subscriber_count(), 2);

        feed.send(mock_beacon(1)).await.unwrap();
        assert_eq!(timeout(WAIT, first.recv()).await.unwrap().unwrap().round, 1);
        assert_eq!(timeout(WAIT, second.recv()).await.unwrap().unwrap().round, 1);

        first_cancel.cancel();
        feed.send(mock_beacon(2)).await.unwrap();

        assert_eq!(timeout(WAIT, second.recv()).await.unwrap().unwrap().round, 2);
        assert!(timeout(WAIT, first.recv()).await.unwrap().is_none());
        wait_until(|| agg.subscriber_count() == 1).await;
    }

    #[tokio::test]
    async fn test_slow_watcher_drops_without_blocking() {
        let (mock, feed) = MockClient::with_watch(1, 8);
        let agg = WatchAggregator::with_config(
            mock,
            WatchConfig {
                buffer: 1,
                ..Default::default()
            },
        );

        let mut slow = agg.watch(CancellationToken::new());
        let mut fast = agg.watch(CancellationToken::new());

        for round in 2..=6 {
            timeout(WAIT, feed.send(mock_beacon(round)))
                .await
                .expect("producer blocked")
                .unwrap();
            assert_eq!(timeout(WAIT, fast.recv()).await.unwrap().unwrap().round, round);
        }

        assert_eq!(slow.try_recv().unwrap().round, 2);
        assert!(slow.try_recv().is_err());
        assert_eq!(agg.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_get_prefers_latest_broadcast() {
        let (mock, feed) = MockClient::with_watch(1, 4);
        let agg = WatchAggregator::new(mock);
        let mut rx = agg.watch(CancellationToken::new());

        feed.send(mock_beacon(5)).await.unwrap();
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();

        assert_eq!(agg.get(5).await.unwrap(), mock_beacon(5));
        assert_eq!(agg.inner().calls(), 0);

        assert_eq!(agg.get(3).await.unwrap().round, 3);
        assert_eq!(agg.inner().calls(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_every_watcher() {
        let (mock, _feed) = MockClient::with_watch(1, 4);
        let agg = WatchAggregator::new(mock);
        let mut a = agg.watch(CancellationToken::new());
        let mut b = agg.watch(CancellationToken::new());

        agg.close();
        assert!(timeout(WAIT, a.recv()).await.unwrap().is_none());
        assert!(timeout(WAIT, b.recv()).await.unwrap().is_none());
        assert_eq!(agg.upstream_state(), UpstreamState::Closed);
        assert_eq!(agg.subscriber_count(), 0);

        let mut late = agg.watch(CancellationToken::new());
        assert!(timeout(WAIT, late.recv()).await.unwrap().is_none());
    }

    /// Client that opens a fresh feed for every watch
    struct ReopeningClient {
        feeds: Mutex<Vec<mpsc::Sender<Beacon>>>,
        watches: AtomicUsize,
    }

    #[async_trait]
    impl Client for ReopeningClient {
        async fn get(&self, round: u64) -> BeaconResult<Beacon> {
            Ok(mock_beacon(round))
        }

        fn watch(&self, _cancel: CancellationToken) -> BeaconReceiver {
            let (tx, rx) = mpsc::channel(4);
            self.feeds.lock().push(tx);
            self.watches.fetch_add(1, Ordering::SeqCst);
            rx
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_upstream_ends() {
        let client = ReopeningClient {
            feeds: Mutex::new(Vec::new()),
            watches: AtomicUsize::new(0),
        };
        let agg = WatchAggregator::with_config(
            client,
            WatchConfig {
                buffer: 4,
                reconnect_delay: Duration::from_millis(10),
            },
        );
        let mut rx = agg.watch(CancellationToken::new());

        wait_until(|| agg.inner().watches.load(Ordering::SeqCst) == 1).await;
        wait_until(|| agg.upstream_state() == UpstreamState::Streaming).await;

        agg.inner().feeds.lock().clear();
        wait_until(|| agg.inner().watches.load(Ordering::SeqCst) == 2).await;

        let feed = agg.inner().feeds.lock()[0].clone();
        feed.send(mock_beacon(9)).await.unwrap();
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().round, 9);
        assert_eq!(agg.upstream_state(), UpstreamState::Streaming);
    }
}
