//! Mock upstream beacon node
//!
//! Produces a new round every period (when ticking) and serves point
//! fetches, a live stream and a group descriptor consistent with that
//! schedule.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use beacon_core::{
    unix_now, Beacon, BeaconError, BeaconResult, BeaconStream, GroupNode, GroupPacket,
    PublicSource,
};

use crate::mock_beacon;

#[derive(Clone, Debug)]
enum StreamEvent {
    Round(Beacon),
    Interrupt,
}

struct UpstreamState {
    latest: Mutex<u64>,
    events: broadcast::Sender<StreamEvent>,
    group: Mutex<Option<GroupPacket>>,
    calls: AtomicUsize,
    pending_failures: AtomicUsize,
    fetch_delay: Mutex<Duration>,
}

impl UpstreamState {
    fn produce(&self) -> Beacon {
        let beacon = {
            let mut latest = self.latest.lock();
            *latest += 1;
            mock_beacon(*latest)
        };
        let _ = self.events.send(StreamEvent::Round(beacon.clone()));
        tracing::debug!(round = beacon.round, "mock upstream produced round");
        beacon
    }
}

/// Mock `PublicSource` with a controllable round clock
pub struct MockUpstream {
    state: Arc<UpstreamState>,
    period: Duration,
    shutdown: CancellationToken,
}

impl MockUpstream {
    /// Upstream whose latest round is `latest`; nothing is produced until
    /// [`produce`](Self::produce) or [`spawn_ticker`](Self::spawn_ticker)
    pub fn new(latest: u64, period: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        let period_secs = period.as_secs().max(1);
        let genesis = unix_now() - (latest.saturating_sub(1) * period_secs) as i64;

        let group = GroupPacket {
            nodes: (0..3)
                .map(|i| GroupNode {
                    address: format!("127.0.0.1:{}", 9000 + i),
                    tls: false,
                    key: vec![i as u8; 48],
                    index: i,
                })
                .collect(),
            threshold: 2,
            period: period_secs as u32,
            genesis_time: genesis.max(1) as u64,
            ..Default::default()
        };

        MockUpstream {
            state: Arc::new(UpstreamState {
                latest: Mutex::new(latest),
                events,
                group: Mutex::new(Some(group)),
                calls: AtomicUsize::new(0),
                pending_failures: AtomicUsize::new(0),
                fetch_delay: Mutex::new(Duration::ZERO),
            }),
            period,
            shutdown: CancellationToken::new(),
        }
    }

    /// Produce one round per period until the upstream is dropped
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        let period = self.period;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        state.produce();
                    }
                }
            }
        })
    }

    /// Produce the next round immediately
    pub fn produce(&self) -> Beacon {
        self.state.produce()
    }

    /// Emit a round that does not follow the latest one
    pub fn produce_round(&self, round: u64) -> Beacon {
        *self.state.latest.lock() = round;
        let beacon = mock_beacon(round);
        let _ = self.state.events.send(StreamEvent::Round(beacon.clone()));
        beacon
    }

    /// Fail every open stream once; streams end after the error
    pub fn interrupt_streams(&self) {
        let _ = self.state.events.send(StreamEvent::Interrupt);
    }

    pub fn latest(&self) -> u64 {
        *self.state.latest.lock()
    }

    /// Point fetches that reached the mock
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, n: usize) {
        self.state.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Hold every later point fetch for `delay` before answering
    pub fn delay_fetches(&self, delay: Duration) {
        *self.state.fetch_delay.lock() = delay;
    }

    /// Stop serving the group descriptor
    pub fn clear_group(&self) {
        *self.state.group.lock() = None;
    }

    /// Number of live streams
    pub fn stream_count(&self) -> usize {
        self.state.events.receiver_count()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl PublicSource for MockUpstream {
    async fn public_rand(&self, round: u64) -> BeaconResult<Beacon> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .state
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BeaconError::Upstream("injected failure".into()));
        }

        let latest = self.latest();
        match round {
            0 => Ok(mock_beacon(latest)),
            r if r <= latest => Ok(mock_beacon(r)),
            r => Err(BeaconError::Upstream(format!("round {} not produced yet", r))),
        }
    }

    async fn public_rand_stream(&self) -> BeaconResult<BeaconStream> {
        let rx = self.state.events.subscribe();
        let stream = stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            loop {
                match rx.recv().await {
                    Ok(StreamEvent::Round(beacon)) => return Some((Ok(beacon), Some(rx))),
                    Ok(StreamEvent::Interrupt) => {
                        return Some((Err(BeaconError::Upstream("stream interrupted".into())), None))
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn group(&self) -> BeaconResult<GroupPacket> {
        self.state
            .group
            .lock()
            .clone()
            .ok_or_else(|| BeaconError::Upstream("group not available".into()))
    }
}
