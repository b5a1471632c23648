//! Beacon Gossip - Round distribution over a pub/sub overlay
//!
//! This crate provides:
//! - Topic naming and the gossip payload codec
//! - Overlay traits (`PubSub`, `Topic`, `Subscription`)
//! - In-memory overlay for tests and local networks
//! - Relay client (receive, dedupe, fan out)
//! - Publisher (forward a watch into the topic)

pub mod codec;
pub mod memory;
pub mod overlay;
pub mod publisher;
pub mod relay;
pub mod topic;

pub use codec::*;
pub use memory::{MemoryNetwork, MemoryPubSub};
pub use overlay::*;
pub use publisher::*;
pub use relay::*;
pub use topic::*;
