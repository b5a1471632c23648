//! Beacon Client - Consumer-side round access
//!
//! - `ArcCache`: bounded adaptive replacement cache
//! - `CachingClient`: point lookups served from the cache
//! - `WatchAggregator`: one upstream watch shared by many watchers

pub mod arc;
pub mod cache;
pub mod watch;

pub use arc::*;
pub use cache::*;
pub use watch::*;
