use super::{Detach, ThreadHandle};
use crate::errors::SpawnError;

/// Builder for threads with a non-default stack size or detach mode.
///
/// ```ignore
/// let worker = ThreadBuilder::new()
///     .stack_size(8 * 1024)
///     .spawn(|| { crunch(); 0 })?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadBuilder {
    stack_size: Option<usize>,
    detach: Detach,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size in bytes, excluding the TLS block.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Let the scheduler reclaim the thread as soon as it returns.
    pub fn detached(mut self) -> Self {
        self.detach = Detach::Detached;
        self
    }

    /// Create the thread on the current core.
    pub fn spawn<F>(self, f: F) -> Result<ThreadHandle, SpawnError>
    where
        F: FnOnce() -> i32 + 'static,
    {
        self.spawn_with(move |()| f(), ())
    }

    /// Create the thread on the current core, passing `arg` to `f`.
    pub fn spawn_with<F, T>(self, f: F, arg: T) -> Result<ThreadHandle, SpawnError>
    where
        F: FnOnce(T) -> i32 + 'static,
        T: 'static,
    {
        crate::create(f, arg, self.stack_size, self.detach)
    }
}
