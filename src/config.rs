//! Scheduler configuration.
//!
//! Every core gets its own scheduler built from a [`Config`]. The table
//! capacity is fixed when the scheduler is configured and never grows
//! afterwards, so outstanding handles stay valid.

use crate::mem::TlsTemplate;

/// Default number of thread slots per core.
pub const DEFAULT_MAX_THREADS: usize = 64;

/// Default stack size for threads created without an explicit size.
///
/// Host builds get more room because std formatting and debug builds use
/// considerably larger frames than a size-optimized firmware image.
pub const DEFAULT_STACK_SIZE: usize = if cfg!(any(test, feature = "std-shim")) {
    64 * 1024
} else {
    4 * 1024
};

/// Smallest stack a thread may be created with (excluding TLS).
pub const MIN_STACK_SIZE: usize = 1024;

/// Number of interrupt lines that threads can wait for.
///
/// Lines `0..32` are the main interrupt bank, `32..64` the auxiliary bank.
pub const MAX_INTERRUPTS: usize = 64;

/// Number of cores that get their own scheduler on bare metal.
pub const MAX_CORES: usize = 2;

/// Per-core scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of slots in the thread table
    pub max_threads: usize,
    /// Stack size used when `create` is called without a size
    pub default_stack_size: usize,
    /// Thread-local storage template copied into every new thread
    pub tls: TlsTemplate,
}

impl Config {
    /// Default configuration, usable in `const` contexts.
    pub const fn new() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            default_stack_size: DEFAULT_STACK_SIZE,
            tls: TlsTemplate::empty(),
        }
    }

    /// Set the number of thread slots.
    pub const fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the default stack size.
    pub const fn default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    /// Set the thread-local storage template.
    pub const fn tls(mut self, tls: TlsTemplate) -> Self {
        self.tls = tls;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
