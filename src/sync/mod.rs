//! Synchronization between cooperative threads of one core.
//!
//! [`SignalId`] names a rendezvous that threads can park on with
//! `yield_until_signal` and that `send_signal` broadcasts to. The mutex in
//! [`comutex`] is built on the same mechanism with a private signal id.

pub mod comutex;

pub use comutex::{CoMutex, CoMutexGuard, RawCoMutex};

use core::fmt;

const PRIVATE_BIT: u64 = 1 << 63;

/// Application-chosen rendezvous identifier.
///
/// Ids built from a `u32` can never collide with the private ids the crate
/// uses for its own mutexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    pub const fn new(id: u32) -> Self {
        Self(id as u64)
    }

    /// Signal id private to the object at `addr`.
    pub(crate) fn private(addr: usize) -> Self {
        Self(PRIVATE_BIT | addr as u64)
    }

    pub const fn is_private(self) -> bool {
        self.0 & PRIVATE_BIT != 0
    }
}

impl From<u32> for SignalId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_private() {
            write!(f, "signal:private({:#x})", self.0 & !PRIVATE_BIT)
        } else {
            write!(f, "signal:{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ids_never_collide() {
        let app = SignalId::new(u32::MAX);
        let private = SignalId::private(u32::MAX as usize);
        assert_ne!(app, private);
        assert!(private.is_private());
        assert!(!app.is_private());
        assert_eq!(SignalId::from(9), SignalId::new(9));
    }
}
