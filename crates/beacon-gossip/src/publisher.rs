//! Publishing side of the relay network

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use beacon_core::{Beacon, BeaconResult, Client};

use crate::{encode_beacon, pubsub_topic, PubSub, Topic};

/// Announces rounds on a network's topic
pub struct GossipPublisher {
    topic: Arc<dyn Topic>,
}

impl GossipPublisher {
    pub async fn join(pubsub: &dyn PubSub, network: &str) -> BeaconResult<Self> {
        let topic = pubsub.join(&pubsub_topic(network)).await?;
        Ok(GossipPublisher { topic })
    }

    pub async fn publish(&self, beacon: &Beacon) -> BeaconResult<()> {
        self.topic.publish(encode_beacon(beacon)?).await
    }

    /// Announce every round `client` watches until `cancel` fires or the
    /// watch ends; the topic handle is released afterwards
    pub fn forward<C: Client>(self, client: Arc<C>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rounds = client.watch(cancel.clone());
            loop {
                let beacon = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rounds.recv() => match next {
                        Some(beacon) => beacon,
                        None => break,
                    },
                };

                if let Err(e) = self.publish(&beacon).await {
                    tracing::warn!(round = beacon.round, error = %e, "failed to publish round");
                }
            }
            self.topic.close();
            tracing::debug!(topic = self.topic.name(), "publisher stopped");
        })
    }
}
