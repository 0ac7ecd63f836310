//! Architecture abstraction layer for context switching.
//!
//! The scheduler only ever talks to the CPU through [`Arch`]: it prepares a
//! fresh context that starts in a trampoline on a new stack, and it switches
//! between two saved contexts. Everything else is portable.

/// Entry function a fresh context starts in. Receives the `arg` given to
/// [`Arch::init_context`] and never returns.
pub type ThreadEntry = extern "C" fn(usize) -> !;

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations involve inline assembly. `context_switch` must save and
/// restore every register the calling convention requires a callee to
/// preserve, plus the stack pointer and return address.
pub trait Arch {
    /// Architecture-specific saved context type.
    ///
    /// Holds the callee-saved register state of a suspended context.
    type SavedContext: Default;

    /// Prepare `ctx` so that switching to it runs `entry(arg)` on the stack
    /// whose highest address is `stack_top`.
    ///
    /// # Safety
    ///
    /// - `stack_top` must be 16-byte aligned and point one past the end of
    ///   a writable stack that outlives the context
    /// - `ctx` must not be the context currently executing
    unsafe fn init_context(ctx: &mut Self::SavedContext, stack_top: *mut u8, entry: ThreadEntry, arg: usize);

    /// Save the calling context into `prev` and resume `next`.
    ///
    /// Returns when another context switches back to `prev`.
    ///
    /// # Safety
    ///
    /// - `prev` must point to a valid, properly aligned SavedContext
    /// - `next` must have been prepared by `init_context` or filled by a
    ///   previous `context_switch`
    /// - Both pointers must remain valid until the switched-to context
    ///   switches back
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Idle until the next interrupt. Called when no thread is runnable but
    /// the scheduler context is itself waiting for an event.
    fn wait_for_interrupt();

    /// Idle until the next interrupt unless `ready` holds.
    ///
    /// `ready` runs with interrupts masked, so an interrupt that makes it
    /// true cannot slip in between the check and the idle instruction. The
    /// default only suits hosts, where the idle hook merely yields.
    fn idle_unless(ready: impl FnOnce() -> bool) {
        if !ready() {
            Self::wait_for_interrupt();
        }
    }

    /// Index of the executing core.
    fn core_id() -> usize {
        0
    }
}

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::Aarch64Arch as DefaultArch;
#[cfg(target_arch = "x86_64")]
pub use x86_64::X86_64Arch as DefaultArch;

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
compile_error!("No context switch implementation for this architecture (supported: aarch64, x86_64).");

/// Idle hook shared by host builds, where sleeping the CPU is not allowed.
#[cfg(any(test, feature = "std-shim"))]
pub(crate) fn host_idle() {
    std::thread::yield_now();
}
