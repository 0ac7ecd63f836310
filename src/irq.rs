//! Interrupt wake bookkeeping and the callback table.
//!
//! Interrupt handlers never touch the thread table. Each line has an epoch
//! counter that [`InterruptLines::notify`] bumps with a single atomic add;
//! a waiting thread records the epoch it started waiting at, and the
//! scheduler makes it runnable again once the counter has moved on. Firings
//! that happen before a wait begins are therefore never observed by it, and
//! several firings during one wait collapse into a single wake.

use crate::config::MAX_INTERRUPTS;
use core::fmt;
use portable_atomic::{AtomicU32, AtomicUsize, Ordering};

/// Lines per interrupt bank.
pub const BANK_LINES: u8 = 32;

const ANY_INDEX: usize = MAX_INTERRUPTS;

/// An interrupt line a thread can wait for.
///
/// Ids `0..32` are the main bank, `32..64` the auxiliary bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterruptId(u8);

impl InterruptId {
    /// Fires whenever any line fires.
    pub const ANY: Self = Self(ANY_INDEX as u8);

    /// Line `line` of the combined id space.
    ///
    /// # Panics
    ///
    /// Panics if `line >= MAX_INTERRUPTS`.
    pub const fn new(line: u8) -> Self {
        assert!((line as usize) < MAX_INTERRUPTS, "interrupt line out of range");
        Self(line)
    }

    /// Like [`InterruptId::new`] but returns `None` for an invalid line.
    pub const fn try_new(line: u8) -> Option<Self> {
        if (line as usize) < MAX_INTERRUPTS {
            Some(Self(line))
        } else {
            None
        }
    }

    /// Line `line` of the auxiliary bank.
    ///
    /// # Panics
    ///
    /// Panics if `line >= 32`.
    pub const fn aux(line: u8) -> Self {
        assert!(line < BANK_LINES, "auxiliary interrupt line out of range");
        Self(BANK_LINES + line)
    }

    /// Index into the combined id space (`MAX_INTERRUPTS` for [`InterruptId::ANY`]).
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether the id belongs to the auxiliary bank.
    pub const fn is_aux(self) -> bool {
        self.0 >= BANK_LINES && (self.0 as usize) < MAX_INTERRUPTS
    }
}

impl fmt::Display for InterruptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ANY {
            write!(f, "irq:any")
        } else if self.is_aux() {
            write!(f, "irq:aux{}", self.0 - BANK_LINES)
        } else {
            write!(f, "irq:{}", self.0)
        }
    }
}

/// A callback run by [`dispatch`] before waiters of its line are woken.
pub type InterruptHandler = fn();

/// Per-core interrupt state. Safe to use from interrupt context.
pub(crate) struct InterruptLines {
    epochs: [AtomicU32; MAX_INTERRUPTS + 1],
    handlers: [AtomicUsize; MAX_INTERRUPTS],
}

impl InterruptLines {
    pub(crate) const fn new() -> Self {
        Self {
            epochs: [const { AtomicU32::new(0) }; MAX_INTERRUPTS + 1],
            handlers: [const { AtomicUsize::new(0) }; MAX_INTERRUPTS],
        }
    }

    /// Current epoch of `id`.
    pub(crate) fn epoch(&self, id: InterruptId) -> u32 {
        self.epochs[id.index()].load(Ordering::Acquire)
    }

    /// Record one firing of `id`.
    pub(crate) fn notify(&self, id: InterruptId) {
        if id != InterruptId::ANY {
            self.epochs[id.index()].fetch_add(1, Ordering::AcqRel);
        }
        self.epochs[ANY_INDEX].fetch_add(1, Ordering::AcqRel);
    }

    /// Record one firing of every line whose bit is set in `mask`.
    pub(crate) fn notify_mask(&self, mask: u64) {
        for_each_line(mask, |id| self.notify(id));
    }

    pub(crate) fn set_handler(&self, id: InterruptId, handler: Option<InterruptHandler>) {
        if id == InterruptId::ANY {
            return;
        }
        let raw = handler.map_or(0, |f| f as *const () as usize);
        self.handlers[id.index()].store(raw, Ordering::Release);
    }

    /// Run the callbacks of every line in `mask`, then wake its waiters.
    pub(crate) fn dispatch(&self, mask: u64) {
        for_each_line(mask, |id| {
            let raw = self.handlers[id.index()].load(Ordering::Acquire);
            if raw != 0 {
                // Safety: only values produced from an InterruptHandler are stored
                let handler = unsafe { core::mem::transmute::<usize, InterruptHandler>(raw) };
                handler();
            }
            self.notify(id);
        });
    }
}

fn for_each_line(mut mask: u64, mut f: impl FnMut(InterruptId)) {
    while mask != 0 {
        let line = mask.trailing_zeros() as u8;
        mask &= mask - 1;
        f(InterruptId(line));
    }
}

/// Register `handler` for `id` on the current core, replacing any previous one.
pub fn register_handler(id: InterruptId, handler: InterruptHandler) {
    crate::percpu::kernel().interrupts().set_handler(id, Some(handler));
}

/// Remove the handler of `id` on the current core.
pub fn unregister_handler(id: InterruptId) {
    crate::percpu::kernel().interrupts().set_handler(id, None);
}

/// Interrupt entry point: bit `n` of `mask` means line `n` fired.
///
/// Runs the registered callbacks and wakes the waiting threads. Never
/// switches context, so it may be called from the platform's IRQ vector.
pub fn dispatch(mask: u64) {
    crate::percpu::kernel().interrupts().dispatch(mask);
}
