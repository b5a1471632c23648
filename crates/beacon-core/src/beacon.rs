//! The beacon round as delivered to consumers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BeaconError, BeaconResult};

/// One produced round of randomness.
///
/// Immutable once produced. Byte fields are hex-encoded in JSON so the HTTP
/// body matches what beacon nodes publish.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub round: u64,
    #[serde(with = "hex_bytes")]
    pub randomness: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub previous_signature: Vec<u8>,
}

impl Beacon {
    pub fn new(round: u64, randomness: Vec<u8>, signature: Vec<u8>) -> Self {
        Beacon {
            round,
            randomness,
            signature,
            previous_signature: Vec::new(),
        }
    }

    pub fn with_previous_signature(mut self, previous: Vec<u8>) -> Self {
        self.previous_signature = previous;
        self
    }

    /// Encode as the JSON body served over HTTP
    pub fn to_json(&self) -> BeaconResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BeaconError::Decode(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> BeaconResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| BeaconError::Decode(e.to_string()))
    }
}

impl fmt::Debug for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Beacon(round={}, randomness={})",
            self.round,
            hex::encode(&self.randomness)
        )
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_uses_hex_fields() {
        let beacon = Beacon::new(7, vec![0xab, 0xcd], vec![0x01]);
        let json: serde_json::Value = serde_json::from_slice(&beacon.to_json().unwrap()).unwrap();

        assert_eq!(json["round"], 7);
        assert_eq!(json["randomness"], "abcd");
        assert_eq!(json["signature"], "01");
        assert_eq!(json["previous_signature"], "");
    }

    #[test]
    fn test_previous_signature_optional() {
        let beacon = Beacon::from_json(br#"{"round":3,"randomness":"ff","signature":"00"}"#).unwrap();
        assert_eq!(beacon.round, 3);
        assert!(beacon.previous_signature.is_empty());
    }

    #[test]
    fn test_rejects_bad_hex() {
        let err = Beacon::from_json(br#"{"round":3,"randomness":"zz","signature":"00"}"#).unwrap_err();
        assert!(matches!(err, BeaconError::Decode(_)));
    }
}
