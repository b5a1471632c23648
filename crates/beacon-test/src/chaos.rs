//! Gossip chaos for relay testing
//!
//! Simulates what an overlay does to a sequence of announcements:
//! - Loss
//! - Duplication
//! - Reordering (bounded depth)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Gossip chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Duplicate probability
    pub duplicate_prob: f64,
    /// Reorder probability
    pub reorder_prob: f64,
    /// Reorder depth (max positions an item moves back)
    pub reorder_depth: usize,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.05,
            duplicate_prob: 0.2,
            reorder_prob: 0.2,
            reorder_depth: 3,
        }
    }
}

impl ChaosConfig {
    /// In-order, lossless delivery
    pub fn perfect() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
            reorder_depth: 0,
        }
    }

    /// Heavy duplication and reordering
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.1,
            duplicate_prob: 0.5,
            reorder_prob: 0.5,
            reorder_depth: 8,
        }
    }
}

/// Deterministic scrambler for announcement sequences
pub struct GossipChaos {
    config: ChaosConfig,
    rng: StdRng,
}

impl GossipChaos {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        GossipChaos {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Apply loss, duplication and reordering to `items`
    pub fn scramble<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        let mut out: Vec<T> = Vec::with_capacity(items.len() * 2);

        for item in items {
            if self.rng.gen::<f64>() < self.config.loss_rate {
                continue;
            }
            out.push(item.clone());
            if self.rng.gen::<f64>() < self.config.duplicate_prob {
                out.push(item.clone());
            }
        }

        if self.config.reorder_depth > 0 {
            for i in 1..out.len() {
                if self.rng.gen::<f64>() < self.config.reorder_prob {
                    let depth = self.rng.gen_range(1..=self.config.reorder_depth.min(i));
                    out.swap(i, i - depth);
                }
            }
        }

        out
    }
}
