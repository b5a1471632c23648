//! Beacon Core - Shared types for the randomness beacon distribution layer
//!
//! This crate defines what the cache, aggregator, gossip relay and HTTP
//! server exchange:
//! - The delivered round (`Beacon`)
//! - Group descriptor and round schedule
//! - Registration identities
//! - Collaborator traits (`Client`, `PublicSource`)
//! - Error types

pub mod beacon;
pub mod error;
pub mod group;
pub mod id;
pub mod source;
pub mod time;

pub use beacon::*;
pub use error::*;
pub use group::*;
pub use id::*;
pub use source::*;
pub use time::*;
