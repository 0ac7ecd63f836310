//! Fixed-capacity thread table.
//!
//! Slots are allocated once when the table is built. A handle is a slot
//! index; a freed slot is handed out again, lowest index first.

use super::{Tcb, ThreadHandle};
use crate::arch::Arch;
use crate::errors::SpawnError;
use alloc::boxed::Box;
use alloc::vec::Vec;

pub(crate) struct ThreadTable<A: Arch> {
    slots: Vec<Option<Box<Tcb<A>>>>,
    live: usize,
}

impl<A: Arch> ThreadTable<A> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, live: 0 }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn is_full(&self) -> bool {
        self.live == self.slots.len()
    }

    pub(crate) fn insert(&mut self, tcb: Box<Tcb<A>>) -> Result<ThreadHandle, SpawnError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SpawnError::TooManyThreads)?;
        self.slots[index] = Some(tcb);
        self.live += 1;
        Ok(ThreadHandle::from_index(index))
    }

    pub(crate) fn get(&self, handle: ThreadHandle) -> Option<&Tcb<A>> {
        self.slots.get(handle.index())?.as_deref()
    }

    pub(crate) fn get_mut(&mut self, handle: ThreadHandle) -> Option<&mut Tcb<A>> {
        self.slots.get_mut(handle.index())?.as_deref_mut()
    }

    pub(crate) fn remove(&mut self, handle: ThreadHandle) -> Option<Box<Tcb<A>>> {
        let tcb = self.slots.get_mut(handle.index())?.take()?;
        self.live -= 1;
        Some(tcb)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ThreadHandle, &Tcb<A>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| Some((ThreadHandle::from_index(i), slot.as_deref()?)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ThreadHandle, &mut Tcb<A>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| Some((ThreadHandle::from_index(i), slot.as_deref_mut()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::DefaultArch;
    use crate::mem::{StackRegion, TlsTemplate};
    use crate::thread::{Detach, ThreadState};

    fn tcb() -> Box<Tcb<DefaultArch>> {
        let stack = StackRegion::allocate(crate::config::MIN_STACK_SIZE, &TlsTemplate::empty()).unwrap();
        Box::new(Tcb::new(stack, Detach::Joinable, Box::new(|| 0)))
    }

    #[test]
    fn test_table_fills_and_reuses_lowest_slot() {
        let mut table = ThreadTable::<DefaultArch>::with_capacity(3);
        let a = table.insert(tcb()).unwrap();
        let b = table.insert(tcb()).unwrap();
        let c = table.insert(tcb()).unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert!(table.is_full());
        assert_eq!(table.insert(tcb()).err(), Some(SpawnError::TooManyThreads));

        assert!(table.remove(b).is_some());
        assert!(table.remove(b).is_none());
        assert_eq!(table.live(), 2);
        assert_eq!(table.insert(tcb()).unwrap(), b);
    }

    #[test]
    fn test_table_lookup() {
        let mut table = ThreadTable::<DefaultArch>::with_capacity(2);
        let a = table.insert(tcb()).unwrap();
        assert!(table.get(a).is_some());
        assert!(table.get(ThreadHandle::from_index(1)).is_none());
        assert!(table.get(ThreadHandle::from_index(99)).is_none());

        table.get_mut(a).unwrap().state = ThreadState::Joined;
        assert_eq!(table.iter().count(), 1);
        assert!(table.iter().all(|(h, tcb)| h == a && tcb.has_joined()));
    }
}
