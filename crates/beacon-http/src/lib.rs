//! Beacon HTTP - Public round API with next-round synchronization
//!
//! Requests for the round right after the latest one are parked until the
//! background watcher sees it produced, instead of polling upstream.
//!
//! - `/public/latest`
//! - `/public/{round}`
//! - `/group`

pub mod config;
pub mod headers;
pub mod server;
pub mod sync;
pub mod telemetry;

pub use config::*;
pub use server::*;
pub use sync::*;
pub use telemetry::init_tracing;
