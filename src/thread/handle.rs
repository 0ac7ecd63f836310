//! Thread handles.

use core::fmt;

/// Identifies a thread on the core that created it.
///
/// A handle is the index of the thread's slot in the table. It stays valid
/// until the thread is deleted (or, if detached, reclaimed); after that the
/// slot and therefore the handle value may be handed to a new thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadHandle(usize);

impl ThreadHandle {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Slot index of the thread.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
