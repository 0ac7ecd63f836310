//! Thread control blocks and their lifecycle states.

use crate::arch::Arch;
use crate::irq::InterruptId;
use crate::mem::StackRegion;
use crate::sync::SignalId;
use alloc::boxed::Box;
use core::cell::UnsafeCell;

pub mod builder;
pub mod handle;
pub mod table;

pub use builder::ThreadBuilder;
pub use handle::ThreadHandle;

/// Scheduling state of a thread.
///
/// ```text
/// Runnable -> WaitingFor* -> Runnable -> ... -> Joined
/// ```
///
/// `Joined` is terminal: the entry function has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible to be resumed by the scheduler
    Runnable,
    /// Parked until the next firing of the interrupt
    WaitingForInterrupt(InterruptId),
    /// Parked until the signal is sent
    WaitingForSignal(SignalId),
    /// Entry function returned; the exit code is available
    Joined,
}

impl ThreadState {
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::WaitingForInterrupt(_) | Self::WaitingForSignal(_))
    }
}

/// Who releases a thread's resources once it has joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Detach {
    /// Kept until the owner calls `delete` after observing the join
    #[default]
    Joinable,
    /// Reclaimed by the scheduler as soon as it joins
    Detached,
}

pub(crate) type Entry = Box<dyn FnOnce() -> i32>;

/// Thread control block.
///
/// Always boxed by the table so the saved context never moves while the
/// thread is suspended.
pub(crate) struct Tcb<A: Arch> {
    /// Unique per kernel, unlike the slot index
    pub(crate) serial: u64,
    pub(crate) state: ThreadState,
    /// Interrupt epoch seen when the current interrupt wait began
    pub(crate) irq_epoch: u32,
    pub(crate) detach: Detach,
    pub(crate) exit_code: i32,
    /// Taken by the thread on its first resume
    pub(crate) entry: Option<Entry>,
    pub(crate) stack: StackRegion,
    pub(crate) context: UnsafeCell<A::SavedContext>,
}

impl<A: Arch> Tcb<A> {
    pub(crate) fn new(stack: StackRegion, detach: Detach, entry: Entry) -> Self {
        Self {
            serial: 0,
            state: ThreadState::Runnable,
            irq_epoch: 0,
            detach,
            exit_code: 0,
            entry: Some(entry),
            stack,
            context: UnsafeCell::new(A::SavedContext::default()),
        }
    }

    pub(crate) fn has_joined(&self) -> bool {
        self.state == ThreadState::Joined
    }

    /// Whether the scheduler frees this block on its own.
    pub(crate) fn reclaimable(&self) -> bool {
        self.has_joined() && self.detach == Detach::Detached
    }
}
