//! AArch64 (ARM64) context switching (AAPCS64).
//!
//! Saves x19-x28, the frame pointer, the link register and sp. With
//! `full-fpu`, the callee-saved lower halves of v8-v15 (d8-d15) as well.

use super::{Arch, ThreadEntry};
use core::arch::naked_asm;

/// Saved callee-saved register state.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Aarch64Context {
    /// Stack pointer
    sp: u64,
    /// Link register (return address)
    lr: u64,
    /// Frame pointer
    fp: u64,
    /// x19-x28
    x: [u64; 10],
    /// d8-d15
    #[cfg(feature = "full-fpu")]
    d: [u64; 8],
}

/// AArch64 architecture implementation.
pub struct Aarch64Arch;

impl Arch for Aarch64Arch {
    type SavedContext = Aarch64Context;

    unsafe fn init_context(ctx: &mut Self::SavedContext, stack_top: *mut u8, entry: ThreadEntry, arg: usize) {
        // `ret` jumps to lr, so nothing needs to be pushed on the new stack.
        let mut fresh = Aarch64Context {
            sp: stack_top as u64,
            lr: thread_trampoline as *const () as usize as u64,
            ..Default::default()
        };
        fresh.x[0] = arg as u64;
        fresh.x[1] = entry as *const () as usize as u64;
        *ctx = fresh;
    }

    #[inline]
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        unsafe { switch_context(prev, next) }
    }

    fn wait_for_interrupt() {
        #[cfg(any(test, feature = "std-shim"))]
        super::host_idle();

        // Safety: wfi only stalls the core until an interrupt is pending
        #[cfg(not(any(test, feature = "std-shim")))]
        unsafe {
            core::arch::asm!("wfi", options(nomem, nostack));
        }
    }

    #[cfg(not(any(test, feature = "std-shim")))]
    fn idle_unless(ready: impl FnOnce() -> bool) {
        // Safety: only the IRQ mask bit changes (EL1). Without `nomem` the
        // asm blocks keep the epoch loads in `ready` inside the masked window.
        unsafe { core::arch::asm!("msr daifset, #2", options(nostack)) };
        if !ready() {
            // wfi still wakes on an IRQ that is pending but masked
            unsafe { core::arch::asm!("wfi", options(nomem, nostack)) };
        }
        unsafe { core::arch::asm!("msr daifclr, #2", options(nostack)) };
    }

    fn core_id() -> usize {
        #[cfg(any(test, feature = "std-shim"))]
        {
            0
        }

        #[cfg(not(any(test, feature = "std-shim")))]
        {
            let mpidr: u64;
            // Safety: reading MPIDR_EL1 has no side effects (EL1)
            unsafe {
                core::arch::asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack, preserves_flags));
            }
            (mpidr & 0xFF) as usize
        }
    }
}

/// First code a fresh context runs: `entry(arg)` with arg in x19, entry in x20.
#[unsafe(naked)]
unsafe extern "C" fn thread_trampoline() {
    naked_asm!(
        "mov x29, xzr",
        "mov x0, x19",
        "blr x20",
        // entry never returns
        "brk #0x1",
    );
}

/// Save callee-saved registers to `old` (x0), load them from `new` (x1).
#[cfg(feature = "full-fpu")]
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_old: *mut Aarch64Context, _new: *const Aarch64Context) {
    naked_asm!(
        "mov x9, sp",
        "str x9,  [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "str x29, [x0, #0x10]",
        "stp x19, x20, [x0, #0x18]",
        "stp x21, x22, [x0, #0x28]",
        "stp x23, x24, [x0, #0x38]",
        "stp x25, x26, [x0, #0x48]",
        "stp x27, x28, [x0, #0x58]",
        "stp d8,  d9,  [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "ldr x9,  [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldr x29, [x1, #0x10]",
        "ldp x19, x20, [x1, #0x18]",
        "ldp x21, x22, [x1, #0x28]",
        "ldp x23, x24, [x1, #0x38]",
        "ldp x25, x26, [x1, #0x48]",
        "ldp x27, x28, [x1, #0x58]",
        "ldp d8,  d9,  [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}

/// Save callee-saved registers to `old` (x0), load them from `new` (x1).
#[cfg(not(feature = "full-fpu"))]
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_old: *mut Aarch64Context, _new: *const Aarch64Context) {
    naked_asm!(
        "mov x9, sp",
        "str x9,  [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "str x29, [x0, #0x10]",
        "stp x19, x20, [x0, #0x18]",
        "stp x21, x22, [x0, #0x28]",
        "stp x23, x24, [x0, #0x38]",
        "stp x25, x26, [x0, #0x48]",
        "stp x27, x28, [x0, #0x58]",
        "ldr x9,  [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldr x29, [x1, #0x10]",
        "ldp x19, x20, [x1, #0x18]",
        "ldp x21, x22, [x1, #0x28]",
        "ldp x23, x24, [x1, #0x38]",
        "ldp x25, x26, [x1, #0x48]",
        "ldp x27, x28, [x1, #0x58]",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        assert_eq!(core::mem::offset_of!(Aarch64Context, x), 0x18);
        #[cfg(feature = "full-fpu")]
        assert_eq!(core::mem::offset_of!(Aarch64Context, d), 0x68);
    }
}
