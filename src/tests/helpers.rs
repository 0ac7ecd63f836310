//! Test helper utilities and common functionality.

use crate::{Detach, Stats, ThreadHandle};
use alloc::vec::Vec;

/// Simple linear congruential generator for property testing.
pub(super) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(super) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(super) fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    pub(super) fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() >> 33) % (max - min)
    }

    pub(super) fn gen_bool(&mut self) -> bool {
        (self.next_u64() >> 40) & 1 == 0
    }
}

/// Create a thread with the default stack. Panics if creation fails.
pub(super) fn spawn<F>(detach: Detach, f: F) -> ThreadHandle
where
    F: FnOnce() -> i32 + 'static,
{
    crate::create(move |()| f(), (), None, detach).expect("failed to create thread")
}

/// Run the scheduler until no thread is runnable and check nothing is
/// left waiting.
pub(super) fn drain() -> Stats {
    let stats = crate::run();
    assert_eq!(stats.waiting_interrupt + stats.waiting_signal, 0, "threads left waiting: {:?}", stats);
    stats
}

/// Collect the exit codes of joined threads and delete them.
pub(super) fn reap(handles: &[ThreadHandle]) -> Vec<i32> {
    handles
        .iter()
        .map(|&handle| {
            let code = crate::exit_code(handle).expect("thread has not joined");
            crate::delete(handle).expect("delete failed");
            code
        })
        .collect()
}
