//! Opaque registration identities
//!
//! Subscriptions and waiters are keyed by a freshly allocated token rather
//! than by the channel they own, so two structurally identical registrations
//! never alias.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one watch/relay subscription
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Identity of one pending next-round waiter
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

/// Monotonic allocator for registration tokens
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub const fn new() -> Self {
        IdAllocator {
            next: AtomicU64::new(1),
        }
    }

    #[inline]
    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscription(&self) -> SubscriptionId {
        SubscriptionId(self.bump())
    }

    pub fn waiter(&self) -> WaiterId {
        WaiterId(self.bump())
    }
}

impl SubscriptionId {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl WaiterId {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Waiter({})", self.0)
    }
}
