//! Gossip payload codec
//!
//! Announcements travel as bincode with raw byte fields; the hex form is
//! only used for the JSON served over HTTP.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use beacon_core::{Beacon, BeaconError, BeaconResult};

#[derive(Serialize, Deserialize)]
struct WireBeacon {
    round: u64,
    randomness: Vec<u8>,
    signature: Vec<u8>,
    previous_signature: Vec<u8>,
}

/// Encode a round for publication
pub fn encode_beacon(beacon: &Beacon) -> BeaconResult<Bytes> {
    let wire = WireBeacon {
        round: beacon.round,
        randomness: beacon.randomness.clone(),
        signature: beacon.signature.clone(),
        previous_signature: beacon.previous_signature.clone(),
    };
    bincode::serialize(&wire)
        .map(Bytes::from)
        .map_err(|e| BeaconError::Decode(e.to_string()))
}

/// Decode a received announcement
pub fn decode_beacon(data: &[u8]) -> BeaconResult<Beacon> {
    let wire: WireBeacon =
        bincode::deserialize(data).map_err(|e| BeaconError::Decode(e.to_string()))?;
    if wire.round == 0 {
        return Err(BeaconError::Decode("round 0 is not a produced round".into()));
    }

    Ok(Beacon::new(wire.round, wire.randomness, wire.signature)
        .with_previous_signature(wire.previous_signature))
}
