//! Beacon Test Harness - Mocks and chaos tools for the relay crates
//!
//! This crate provides:
//! - Deterministic beacon fixtures
//! - A counting mock `Client` with an injectable watch channel
//! - A ticking mock upstream node (`PublicSource`)
//! - Gossip chaos (loss, duplication, reordering of announcements)

pub mod chaos;
pub mod fixtures;
pub mod mock_client;
pub mod mock_upstream;

pub use chaos::*;
pub use fixtures::*;
pub use mock_client::*;
pub use mock_upstream::*;
