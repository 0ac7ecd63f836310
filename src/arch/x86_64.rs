//! x86_64 context switching (System V ABI).
//!
//! Only callee-saved state is switched: cooperative switches happen at a
//! function call, so the compiler already spilled every caller-saved register.

use super::{Arch, ThreadEntry};
use core::arch::naked_asm;

/// Default MXCSR: all exceptions masked, round to nearest.
const MXCSR_DEFAULT: u32 = 0x1F80;
/// Default x87 control word: all exceptions masked, 64-bit precision.
const FPUCW_DEFAULT: u16 = 0x037F;

/// Saved callee-saved register state.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct X86_64Context {
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    /// SSE control/status, callee-saved control bits
    mxcsr: u32,
    /// x87 control word
    fpucw: u16,
    _pad: u16,
}

impl Default for X86_64Context {
    fn default() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: MXCSR_DEFAULT,
            fpucw: FPUCW_DEFAULT,
            _pad: 0,
        }
    }
}

/// x86_64 architecture implementation.
pub struct X86_64Arch;

impl Arch for X86_64Arch {
    type SavedContext = X86_64Context;

    unsafe fn init_context(ctx: &mut Self::SavedContext, stack_top: *mut u8, entry: ThreadEntry, arg: usize) {
        // `ret` in context_switch pops the trampoline address, leaving rsp at
        // stack_top (16-byte aligned). The trampoline's `call` then enters
        // `entry` with rsp = 16n + 8, as the ABI expects at function entry.
        let initial_rsp = stack_top as usize - 8;

        unsafe {
            (initial_rsp as *mut u64).write(thread_trampoline as *const () as usize as u64);
        }

        *ctx = X86_64Context {
            rsp: initial_rsp as u64,
            r12: arg as u64,
            r13: entry as *const () as usize as u64,
            ..Default::default()
        };
    }

    #[inline]
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        unsafe { switch_context(prev, next) }
    }

    fn wait_for_interrupt() {
        #[cfg(any(test, feature = "std-shim"))]
        super::host_idle();

        // Safety: hlt only pauses until the next interrupt (bare metal, ring 0)
        #[cfg(not(any(test, feature = "std-shim")))]
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }

    #[cfg(not(any(test, feature = "std-shim")))]
    fn idle_unless(ready: impl FnOnce() -> bool) {
        // Safety: cli/sti only toggle IF (ring 0). Without `nomem` they also
        // keep the epoch loads in `ready` inside the masked window.
        unsafe { core::arch::asm!("cli", options(nostack)) };
        if ready() {
            unsafe { core::arch::asm!("sti", options(nostack)) };
        } else {
            // The sti shadow delays delivery until hlt has started
            unsafe { core::arch::asm!("sti", "hlt", options(nostack)) };
        }
    }
}

/// First code a fresh context runs: `entry(arg)` with arg in r12, entry in r13.
#[unsafe(naked)]
unsafe extern "C" fn thread_trampoline() {
    naked_asm!(
        "mov rdi, r12",
        "call r13",
        // entry never returns
        "ud2",
    );
}

/// Save callee-saved registers to `old` (rdi), load them from `new` (rsi).
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_old: *mut X86_64Context, _new: *const X86_64Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr dword ptr [rdi + 0x38]",
        "fnstcw word ptr [rdi + 0x3c]",
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr dword ptr [rsi + 0x38]",
        "fldcw word ptr [rsi + 0x3c]",
        // Fresh context: pops the trampoline. Suspended one: returns to its caller.
        "ret",
    );
}
