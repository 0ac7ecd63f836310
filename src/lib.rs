#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Bare-metal cooperative multithreading, one scheduler per core.
//!
//! Threads share the core they were created on and run until they give it
//! up at a yield point: [`yield_now`], [`yield_until_interrupt`],
//! [`yield_until_signal`], [`sleep`], or returning from their entry
//! function. Nothing is ever preempted.
//!
//! # Features
//!
//! - `full-fpu`: Save callee-saved FP registers on every switch (default)
//! - `std-shim`: Host build where every OS thread acts as a core
//! - `linker-tls`: Build the TLS template from linker script symbols
//!
//! # Quick Start
//!
//! ```ignore
//! use cothreads::{Detach, InterruptId};
//!
//! const VBLANK: InterruptId = InterruptId::new(0);
//!
//! fn main_loop() {
//!     let worker = cothreads::create(|frames: u32| {
//!         for _ in 0..frames {
//!             cothreads::yield_until_interrupt(VBLANK);
//!         }
//!         0
//!     }, 60, None, Detach::Joinable).unwrap();
//!
//!     while !cothreads::has_joined(worker) {
//!         cothreads::sleep();
//!     }
//!     cothreads::delete(worker).unwrap();
//! }
//!
//! // In the platform's IRQ vector:
//! fn on_irq(pending: u64) {
//!     cothreads::irq::dispatch(pending);
//! }
//! ```
//!
//! The context that calls into the scheduler (usually the core's initial
//! context) is a participant too: calling a yield primitive there runs the
//! threads until its own wake condition holds.

pub mod arch;
pub mod config;
pub mod errors;
pub mod irq;
pub mod kernel;
pub mod mem;
pub mod percpu;
mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
mod tests;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

extern crate alloc;

#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        <DefaultArch as Arch>::wait_for_interrupt();
    }
}

// ============================================================================
// Public API
// ============================================================================

pub use arch::{Arch, DefaultArch};
pub use config::Config;
pub use errors::{ConfigError, ContractViolation, JoinError, SpawnError, ThreadError, ThreadResult};
pub use irq::InterruptId;
pub use kernel::{Kernel, Stats};
pub use sync::{CoMutex, CoMutexGuard, RawCoMutex, SignalId};
pub use thread::{Detach, ThreadBuilder, ThreadHandle, ThreadState};

// ============================================================================
// Convenience Functions
// ============================================================================

/// Create a thread on the current core running `entry(arg)`.
///
/// `stack_size` of `None` uses the configured default.
pub fn create<F, T>(entry: F, arg: T, stack_size: Option<usize>, detach: Detach) -> Result<ThreadHandle, SpawnError>
where
    F: FnOnce(T) -> i32 + 'static,
    T: 'static,
{
    percpu::kernel().create(entry, arg, stack_size, detach)
}

/// Give the other threads a turn. The caller stays runnable.
#[inline]
pub fn yield_now() {
    percpu::kernel().yield_now();
}

/// Suspend until the next firing of `id`.
pub fn yield_until_interrupt(id: InterruptId) {
    percpu::kernel().yield_until_interrupt(id);
}

/// Suspend until the next firing of auxiliary line `line`.
///
/// # Panics
///
/// Panics if `line >= 32`.
pub fn yield_until_interrupt_aux(line: u8) {
    percpu::kernel().yield_until_interrupt(InterruptId::aux(line));
}

/// Suspend until `id` is sent.
pub fn yield_until_signal(id: SignalId) {
    percpu::kernel().yield_until_signal(id);
}

/// Wake every context waiting for `id`. Does not yield.
pub fn send_signal(id: SignalId) -> usize {
    percpu::kernel().send_signal(id)
}

/// Yield if another thread can run, otherwise idle until any interrupt.
pub fn sleep() {
    percpu::kernel().sleep();
}

pub fn has_joined(handle: ThreadHandle) -> bool {
    percpu::kernel().has_joined(handle)
}

pub fn exit_code(handle: ThreadHandle) -> Result<i32, JoinError> {
    percpu::kernel().exit_code(handle)
}

pub fn delete(handle: ThreadHandle) -> ThreadResult<()> {
    percpu::kernel().delete(handle)
}

/// Scheduling state of `handle`, `None` for a free slot.
pub fn state(handle: ThreadHandle) -> Option<ThreadState> {
    percpu::kernel().state(handle)
}

/// The running thread, `None` in the scheduler context.
pub fn current_handle() -> Option<ThreadHandle> {
    percpu::kernel().current_handle()
}

/// TLS block of the running context.
pub fn tls_base() -> *mut u8 {
    percpu::kernel().tls_base()
}

/// Record a firing of `id`. Safe to call from interrupt context.
pub fn notify_interrupt(id: InterruptId) {
    percpu::kernel().notify_interrupt(id);
}

/// Record a firing of every line set in `mask`.
pub fn notify_interrupts(mask: u64) {
    percpu::kernel().notify_interrupts(mask);
}

/// Run the current core's threads until none is runnable.
pub fn run() -> Stats {
    percpu::kernel().run()
}

/// One round-robin pass over the current core's threads.
pub fn run_pass() -> usize {
    percpu::kernel().run_pass()
}

pub fn stats() -> Stats {
    percpu::kernel().stats()
}

/// Reconfigure the current core's scheduler. Fails while threads are alive.
pub fn configure(config: Config) -> Result<(), ConfigError> {
    percpu::kernel().configure(config)
}
