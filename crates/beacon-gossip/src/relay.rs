//! Gossip relay client
//!
//! Joins the network's topic, drops announcements that do not advance the
//! latest seen round, and fans the rest out to local subscriber queues.
//! Announcements are not verified against the network key here; a verifying
//! consumer sits on top.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use beacon_core::{
    Beacon, BeaconError, BeaconReceiver, BeaconResult, IdAllocator, SubscriptionId,
};

use crate::{decode_beacon, pubsub_topic, PubSub, Subscription, Topic};

/// Relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Capacity of queues created by [`RelayClient::channel`]
    pub buffer_hint: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig { buffer_hint: 8 }
    }
}

/// Admits only rounds strictly above every round admitted before
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundFilter {
    latest: u64,
}

impl RoundFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `round` if it advances the filter
    pub fn admit(&mut self, round: u64) -> bool {
        if round <= self.latest {
            return false;
        }
        self.latest = round;
        true
    }

    pub fn latest(&self) -> u64 {
        self.latest
    }
}

struct RelayState {
    filter: RoundFilter,
    subscribers: HashMap<SubscriptionId, mpsc::Sender<Beacon>>,
    closed: bool,
}

struct RelayShared {
    state: Mutex<RelayState>,
    ids: IdAllocator,
}

impl RelayShared {
    fn handle(&self, data: &[u8]) {
        let beacon = match decode_beacon(data) {
            Ok(beacon) => beacon,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable announcement");
                return;
            }
        };

        let mut state = self.state.lock();
        if state.closed || !state.filter.admit(beacon.round) {
            return;
        }

        state.subscribers.retain(|_, sender| match sender.try_send(beacon.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(round = beacon.round, "round notification dropped, subscriber queue full");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    fn close_all(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

/// Handle returned by [`RelayClient::subscribe`]
#[must_use = "dropping the handle keeps the subscription alive"]
pub struct Unsubscribe {
    id: SubscriptionId,
    shared: Arc<RelayShared>,
}

impl Unsubscribe {
    /// Stop deliveries and close the subscriber's queue
    pub fn unsubscribe(self) {
        self.shared.state.lock().subscribers.remove(&self.id);
    }
}

/// Receives round announcements from the gossip overlay
pub struct RelayClient {
    shared: Arc<RelayShared>,
    cancel: CancellationToken,
    config: RelayConfig,
}

impl RelayClient {
    /// Join `network`'s topic on `pubsub` and start receiving.
    ///
    /// The relay stops when [`close`](Self::close) is called, when `root` is
    /// cancelled, or when the overlay closes the subscription.
    pub async fn new(
        pubsub: &dyn PubSub,
        network: &str,
        root: &CancellationToken,
        config: RelayConfig,
    ) -> BeaconResult<Self> {
        let topic = pubsub.join(&pubsub_topic(network)).await?;
        let subscription = match topic.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                topic.close();
                return Err(e);
            }
        };

        let shared = Arc::new(RelayShared {
            state: Mutex::new(RelayState {
                filter: RoundFilter::new(),
                subscribers: HashMap::new(),
                closed: false,
            }),
            ids: IdAllocator::new(),
        });
        let cancel = root.child_token();

        tokio::spawn(run_relay(
            Arc::clone(&shared),
            topic,
            subscription,
            cancel.clone(),
        ));

        Ok(RelayClient {
            shared,
            cancel,
            config,
        })
    }

    /// Deliver admitted rounds to `sender` until unsubscribed or closed.
    ///
    /// The relay owns the sender from here on. Rounds are dropped for this
    /// subscriber whenever its queue is full.
    pub fn subscribe(&self, sender: mpsc::Sender<Beacon>) -> Unsubscribe {
        let id = self.shared.ids.subscription();
        {
            let mut state = self.shared.state.lock();
            if !state.closed {
                state.subscribers.insert(id, sender);
            }
        }

        Unsubscribe {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queue sized by `RelayConfig::buffer_hint`
    pub fn channel(&self) -> (mpsc::Sender<Beacon>, BeaconReceiver) {
        mpsc::channel(self.config.buffer_hint.max(1))
    }

    /// Highest round delivered so far
    pub fn latest(&self) -> u64 {
        self.shared.state.lock().filter.latest()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Stop receiving, close every subscriber queue and leave the topic
    pub fn close(&self) {
        self.cancel.cancel();
        self.shared.close_all();
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_relay(
    shared: Arc<RelayShared>,
    topic: Arc<dyn Topic>,
    mut subscription: Box<dyn Subscription>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => next,
        };

        match next {
            Ok(msg) => shared.handle(&msg.data),
            Err(BeaconError::StreamClosed) => {
                tracing::debug!(topic = topic.name(), "overlay closed the subscription");
                break;
            }
            Err(e) => tracing::warn!(error = %e, "topic receive error"),
        }
    }

    shared.close_all();
    subscription.cancel();
    topic.close();
    tracing::debug!(topic = topic.name(), "relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use beacon_test::{mock_beacon, ChaosConfig, GossipChaos};
    use bytes::Bytes;
    use proptest::prelude::*;
    use tokio::time::timeout;

    use crate::{encode_beacon, MemoryNetwork, MemoryPubSub};

    const WAIT: Duration = Duration::from_secs(1);
    const NETWORK: &str = "testnet";

    async fn publisher(network: &MemoryNetwork) -> Arc<dyn Topic> {
        MemoryPubSub::new(network)
            .join(&pubsub_topic(NETWORK))
            .await
            .unwrap()
    }

    async fn start_relay(network: &MemoryNetwork, root: &CancellationToken) -> RelayClient {
        let pubsub = MemoryPubSub::new(network);
        RelayClient::new(&pubsub, NETWORK, root, RelayConfig::default())
            .await
            .unwrap()
    }

    async fn announce(topic: &Arc<dyn Topic>, round: u64) {
        topic
            .publish(encode_beacon(&mock_beacon(round)).unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_round_filter() {
        let mut filter = RoundFilter::new();
        assert!(filter.admit(3));
        assert!(!filter.admit(3));
        assert!(!filter.admit(2));
        assert!(filter.admit(5));
        assert_eq!(filter.latest(), 5);
    }

    proptest! {
        #[test]
        fn test_filter_admits_strictly_increasing(rounds in prop::collection::vec(1u64..64, 0..100)) {
            let mut filter = RoundFilter::new();
            let mut seen_max = 0u64;
            let mut admitted = Vec::new();

            for round in rounds {
                let ok = filter.admit(round);
                prop_assert_eq!(ok, round > seen_max);
                if ok {
                    admitted.push(round);
                }
                seen_max = seen_max.max(round);
            }

            prop_assert!(admitted.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_delivers_new_rounds_once() {
        let network = MemoryNetwork::new();
        let topic = publisher(&network).await;
        let relay = start_relay(&network, &CancellationToken::new()).await;

        let (tx, mut rx) = relay.channel();
        let _sub = relay.subscribe(tx);

        for round in [1, 2, 2, 1, 3] {
            announce(&topic, round).await;
        }

        for expected in 1..=3 {
            assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().round, expected);
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(relay.latest(), 3);
    }

    #[tokio::test]
    async fn test_monotonic_under_chaos() {
        let network = MemoryNetwork::new();
        let topic = publisher(&network).await;
        let relay = start_relay(&network, &CancellationToken::new()).await;

        let (tx, mut rx) = mpsc::channel(512);
        let _sub = relay.subscribe(tx);

        let rounds: Vec<u64> = (1..=100).collect();
        let mut chaos = GossipChaos::new(ChaosConfig::hostile(), 11);
        for round in chaos.scramble(&rounds) {
            announce(&topic, round).await;
        }
        announce(&topic, 1_000).await;

        let mut received = Vec::new();
        loop {
            let beacon = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            received.push(beacon.round);
            if beacon.round == 1_000 {
                break;
            }
        }

        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_undecodable_announcement_dropped() {
        let network = MemoryNetwork::new();
        let topic = publisher(&network).await;
        let relay = start_relay(&network, &CancellationToken::new()).await;

        let (tx, mut rx) = relay.channel();
        let _sub = relay.subscribe(tx);

        topic.publish(Bytes::from_static(b"junk")).await.unwrap();
        announce(&topic, 4).await;

        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().round, 4);
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_subscriber_only() {
        let network = MemoryNetwork::new();
        let topic = publisher(&network).await;
        let relay = start_relay(&network, &CancellationToken::new()).await;

        let (small_tx, mut small) = mpsc::channel(1);
        let (big_tx, mut big) = mpsc::channel(8);
        let _a = relay.subscribe(small_tx);
        let _b = relay.subscribe(big_tx);

        for round in 1..=3 {
            announce(&topic, round).await;
        }
        for expected in 1..=3 {
            assert_eq!(timeout(WAIT, big.recv()).await.unwrap().unwrap().round, expected);
        }

        assert_eq!(small.try_recv().unwrap().round, 1);
        assert!(small.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_queue() {
        let network = MemoryNetwork::new();
        let topic = publisher(&network).await;
        let relay = start_relay(&network, &CancellationToken::new()).await;

        let (tx, mut rx) = relay.channel();
        let sub = relay.subscribe(tx);
        assert_eq!(relay.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(relay.subscriber_count(), 0);
        announce(&topic, 1).await;

        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_root_cancel_closes_subscribers() {
        let network = MemoryNetwork::new();
        let root = CancellationToken::new();
        let relay = start_relay(&network, &root).await;

        let (tx, mut rx) = relay.channel();
        let _sub = relay.subscribe(tx);

        root.cancel();
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
        assert!(relay.is_closed());
    }

    #[tokio::test]
    async fn test_overlay_close_shuts_down() {
        let network = MemoryNetwork::new();
        let relay = start_relay(&network, &CancellationToken::new()).await;

        let (tx, mut rx) = relay.channel();
        let _sub = relay.subscribe(tx);

        network.close_topic(&pubsub_topic(NETWORK));
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
        assert!(relay.is_closed());
    }

    #[tokio::test]
    async fn test_subscribe_after_close() {
        let network = MemoryNetwork::new();
        let relay = start_relay(&network, &CancellationToken::new()).await;
        relay.close();

        let (tx, mut rx) = relay.channel();
        relay.subscribe(tx).unsubscribe();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receivers_pruned() {
        let network = MemoryNetwork::new();
        let topic = publisher(&network).await;
        let relay = start_relay(&network, &CancellationToken::new()).await;

        for _ in 0..100 {
            let (tx, rx) = relay.channel();
            drop(rx);
            let _ = relay.subscribe(tx);
        }
        let (tx, mut live) = relay.channel();
        let _live = relay.subscribe(tx);
        assert_eq!(relay.subscriber_count(), 101);

        announce(&topic, 1).await;
        assert_eq!(timeout(WAIT, live.recv()).await.unwrap().unwrap().round, 1);
        assert_eq!(relay.subscriber_count(), 1);
    }

    struct RefusingTopic {
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Topic for RefusingTopic {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn subscribe(&self) -> BeaconResult<Box<dyn Subscription>> {
            Err(BeaconError::Upstream("subscribe refused".into()))
        }

        async fn publish(&self, _data: Bytes) -> BeaconResult<()> {
            Ok(())
        }

        fn close(&self) {
            self.released.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct RefusingPubSub {
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl PubSub for RefusingPubSub {
        async fn join(&self, _topic: &str) -> BeaconResult<Arc<dyn Topic>> {
            Ok(Arc::new(RefusingTopic {
                released: Arc::clone(&self.released),
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_subscribe_releases_topic() {
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let pubsub = RefusingPubSub {
            released: Arc::clone(&released),
        };

        let result = RelayClient::new(&pubsub, NETWORK, &CancellationToken::new(), RelayConfig::default()).await;
        assert!(matches!(result, Err(BeaconError::Upstream(_))));
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    }
}
