//! Deterministic beacon fixtures

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use beacon_core::Beacon;

const RANDOMNESS_LEN: usize = 32;
const SIGNATURE_LEN: usize = 48;

fn signature_of(round: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(round);
    let mut sig = vec![0u8; SIGNATURE_LEN];
    rng.fill_bytes(&mut sig);
    sig
}

/// Beacon for `round` with bytes derived from the round number, so the same
/// round always yields an identical value
pub fn mock_beacon(round: u64) -> Beacon {
    let mut rng = StdRng::seed_from_u64(round ^ 0x5eed);
    let mut randomness = vec![0u8; RANDOMNESS_LEN];
    rng.fill_bytes(&mut randomness);

    Beacon::new(round, randomness, signature_of(round))
        .with_previous_signature(signature_of(round.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_beacon_deterministic() {
        assert_eq!(mock_beacon(5), mock_beacon(5));
        assert_ne!(mock_beacon(5).randomness, mock_beacon(6).randomness);
        assert_eq!(mock_beacon(6).previous_signature, mock_beacon(5).signature);
    }
}
