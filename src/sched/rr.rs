//! Round-robin selection over the thread table.
//!
//! Membership in the run queue is the `Runnable` state of a slot, not a
//! position in a list. The cursor only remembers where the last sweep
//! stopped so every runnable thread gets its turn before any runs twice.

/// Position of the round-robin cursor.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RoundRobin {
    last: Option<usize>,
}

impl RoundRobin {
    pub(crate) const fn new() -> Self {
        Self { last: None }
    }

    /// First slot a sweep over `capacity` slots should look at.
    pub(crate) fn start(&self, capacity: usize) -> usize {
        match self.last {
            Some(last) if capacity > 0 => (last + 1) % capacity,
            _ => 0,
        }
    }

    /// Record that `index` was just resumed.
    pub(crate) fn resumed(&mut self, index: usize) {
        self.last = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_starts_after_last_resumed() {
        let mut rr = RoundRobin::new();
        assert_eq!(rr.start(4), 0);

        rr.resumed(1);
        assert_eq!(rr.start(4), 2);

        rr.resumed(3);
        assert_eq!(rr.start(4), 0);
        assert_eq!(rr.start(0), 0);
    }
}
