//! Group descriptor of the beacon network
//!
//! The descriptor is only consumed here to compute the round schedule for
//! cache headers; its keys are carried opaquely.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BeaconError, BeaconResult};

/// Member of the beacon group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNode {
    pub address: String,
    pub tls: bool,
    #[serde(with = "hex_key")]
    pub key: Vec<u8>,
    pub index: u32,
}

/// Wire form of the group descriptor, as fetched from upstream and served on `/group`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPacket {
    pub nodes: Vec<GroupNode>,
    pub threshold: u32,
    /// Round period in whole seconds
    pub period: u32,
    pub genesis_time: u64,
    #[serde(default)]
    pub transition_time: u64,
    #[serde(default, with = "hex_key")]
    pub genesis_seed: Vec<u8>,
    #[serde(default)]
    pub dist_key: Vec<String>,
}

/// Validated group descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    pub threshold: u32,
    pub period: Duration,
    pub nodes: Vec<GroupNode>,
    /// Unix seconds at which round 1 is produced
    pub genesis_time: i64,
    pub genesis_seed: Vec<u8>,
    pub transition_time: i64,
    /// Distributed public key coefficients, empty before a key generation ran
    pub public_key: Vec<Vec<u8>>,
}

/// Threshold needed for `n` members to produce a round
pub fn minimum_threshold(n: usize) -> u32 {
    (n / 2 + 1) as u32
}

impl GroupInfo {
    /// Validate a wire packet
    pub fn from_packet(packet: &GroupPacket) -> BeaconResult<Self> {
        let min = minimum_threshold(packet.nodes.len());
        if packet.threshold < min {
            return Err(BeaconError::InvalidGroup(format!(
                "threshold {} below minimum {}",
                packet.threshold, min
            )));
        }
        if packet.genesis_time == 0 {
            return Err(BeaconError::InvalidGroup("genesis time zero".into()));
        }
        if packet.period == 0 {
            return Err(BeaconError::InvalidGroup("period zero".into()));
        }

        let public_key = packet
            .dist_key
            .iter()
            .map(|c| hex::decode(c).map_err(|e| BeaconError::InvalidGroup(e.to_string())))
            .collect::<BeaconResult<Vec<_>>>()?;
        if !public_key.is_empty() && public_key.len() != packet.threshold as usize {
            return Err(BeaconError::InvalidGroup(format!(
                "{} public coefficients for threshold {}",
                public_key.len(),
                packet.threshold
            )));
        }

        Ok(GroupInfo {
            threshold: packet.threshold,
            period: Duration::from_secs(packet.period as u64),
            nodes: packet.nodes.clone(),
            genesis_time: packet.genesis_time as i64,
            genesis_seed: packet.genesis_seed.clone(),
            transition_time: packet.transition_time as i64,
            public_key,
        })
    }

    pub fn to_packet(&self) -> GroupPacket {
        GroupPacket {
            nodes: self.nodes.clone(),
            threshold: self.threshold,
            period: self.period.as_secs() as u32,
            genesis_time: self.genesis_time as u64,
            transition_time: self.transition_time as u64,
            genesis_seed: self.genesis_seed.clone(),
            dist_key: self.public_key.iter().map(hex::encode).collect(),
        }
    }

    /// Unix seconds at which `round` is produced
    pub fn time_of_round(&self, round: u64) -> i64 {
        crate::time_of_round(self.period, self.genesis_time, round)
    }
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
