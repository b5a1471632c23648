//! Round schedule math
//!
//! Round 1 is produced at genesis and every later round one period after
//! its predecessor. Times are Unix seconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix seconds at which `round` is produced. Round 0 maps to genesis.
pub fn time_of_round(period: Duration, genesis: i64, round: u64) -> i64 {
    if round == 0 {
        return genesis;
    }
    let elapsed = (round - 1).saturating_mul(period.as_secs());
    genesis.saturating_add(elapsed.min(i64::MAX as u64) as i64)
}

/// Seconds since the Unix epoch, 0 if the clock is before it
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    const PERIOD: Duration = Duration::from_secs(30);

    #[test]
    fn test_time_of_round() {
        assert_eq!(time_of_round(PERIOD, 1000, 0), 1000);
        assert_eq!(time_of_round(PERIOD, 1000, 1), 1000);
        assert_eq!(time_of_round(PERIOD, 1000, 2), 1030);
        assert_eq!(time_of_round(PERIOD, 1000, 11), 1300);
    }

    #[test]
    fn test_time_of_round_saturates() {
        assert_eq!(time_of_round(PERIOD, 1000, u64::MAX), i64::MAX);
    }

    proptest! {
        #[test]
        fn test_rounds_one_period_apart(
            period in 1u64..3600,
            genesis in 1i64..2_000_000_000,
            round in 1u64..1_000_000,
        ) {
            let period = Duration::from_secs(period);
            let this = time_of_round(period, genesis, round);
            let next = time_of_round(period, genesis, round + 1);

            prop_assert!(this >= genesis);
            prop_assert_eq!(next - this, period.as_secs() as i64);
        }
    }
}
