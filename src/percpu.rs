//! Per-core scheduler instances.
//!
//! Every core owns one [`Kernel`]; the free functions at the crate root
//! operate on the kernel of the core they are called on. Host builds treat
//! each OS thread as a core of its own.

use crate::config::Config;
use crate::kernel::Kernel;

#[cfg(any(test, feature = "std-shim"))]
mod imp {
    use super::*;
    use alloc::boxed::Box;

    std::thread_local! {
        static KERNEL: &'static Kernel = Box::leak(Box::new(Kernel::new(Config::new())));
    }

    pub(super) fn kernel() -> &'static Kernel {
        KERNEL.with(|kernel| *kernel)
    }
}

#[cfg(not(any(test, feature = "std-shim")))]
mod imp {
    use super::*;
    use crate::arch::{Arch, DefaultArch};
    use crate::config::MAX_CORES;

    fn build() -> Kernel {
        Kernel::new(Config::new())
    }

    #[allow(clippy::declare_interior_mutable_const)]
    const UNINIT: spin::Lazy<Kernel> = spin::Lazy::new(build);

    static KERNELS: [spin::Lazy<Kernel>; MAX_CORES] = [UNINIT; MAX_CORES];

    pub(super) fn kernel() -> &'static Kernel {
        &KERNELS[DefaultArch::core_id()]
    }
}

/// The scheduler of the calling core.
///
/// # Panics
///
/// On bare metal, panics if the core index is `MAX_CORES` or higher.
pub fn kernel() -> &'static Kernel {
    imp::kernel()
}

/// Build the calling core's scheduler if it does not exist yet.
///
/// Call this before unmasking interrupts so that [`crate::irq::dispatch`]
/// never has to construct it from interrupt context.
pub fn init() {
    let _ = kernel();
}
