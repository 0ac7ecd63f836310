//! Stack regions for cooperative threads.
//!
//! A `StackRegion` is one allocation holding, from low to high addresses,
//! an overflow canary, the usable stack, and the thread's private TLS block:
//!
//! ```text
//! base                                   top          end
//!  | canary | <---- stack grows down ---- | TLS block |
//! ```
//!
//! The region is owned by exactly one thread control block and released
//! when that block is deleted or reclaimed.

use super::tls::TlsTemplate;
use crate::config::MIN_STACK_SIZE;
use crate::errors::SpawnError;
use alloc::alloc::{alloc, dealloc, Layout};
use core::ptr::NonNull;

/// Pattern written at the lowest word of every stack.
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Alignment the ABIs we support require for the initial stack pointer.
const STACK_ALIGN: usize = 16;

/// A thread stack with its TLS block carved out of the same allocation.
pub struct StackRegion {
    /// Start of the allocation (lowest address)
    memory: NonNull<u8>,
    /// Layout used for the allocation, needed to free it
    layout: Layout,
    /// Offset of the TLS block, also the initial stack pointer
    tls_offset: usize,
}

impl StackRegion {
    /// Allocate a stack of at least `stack_size` bytes and instantiate
    /// `tls` at its top.
    pub fn allocate(stack_size: usize, tls: &TlsTemplate) -> Result<Self, SpawnError> {
        if stack_size < MIN_STACK_SIZE {
            return Err(SpawnError::InvalidStackSize(stack_size));
        }

        let align = tls.align().max(STACK_ALIGN);
        let tls_offset = round_up(stack_size, align).ok_or(SpawnError::OutOfMemory)?;
        let tls_size = round_up(tls.block_size(), STACK_ALIGN).ok_or(SpawnError::OutOfMemory)?;
        let total = tls_offset.checked_add(tls_size).ok_or(SpawnError::OutOfMemory)?;

        let layout = Layout::from_size_align(total, align).map_err(|_| SpawnError::OutOfMemory)?;

        // Safety: layout has a non-zero size since stack_size >= MIN_STACK_SIZE
        let memory = NonNull::new(unsafe { alloc(layout) }).ok_or(SpawnError::OutOfMemory)?;

        let region = Self {
            memory,
            layout,
            tls_offset,
        };

        region.install_canary();
        // Safety: the TLS block lies inside the allocation and is block_size() bytes long
        unsafe { tls.instantiate(region.tls_block()) };

        Ok(region)
    }

    /// Lowest address of the region.
    pub fn base(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Initial stack pointer: the highest usable stack address, 16-byte aligned.
    pub fn top(&self) -> *mut u8 {
        // Safety: tls_offset is within the allocation
        unsafe { self.memory.as_ptr().add(self.tls_offset) }
    }

    /// The thread's private copy of the TLS template.
    pub fn tls_block(&self) -> *mut u8 {
        self.top()
    }

    /// Usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.tls_offset
    }

    /// Total size of the allocation, stack plus TLS.
    pub fn allocation_size(&self) -> usize {
        self.layout.size()
    }

    fn install_canary(&self) {
        // Safety: memory is aligned to at least 16 and holds >= MIN_STACK_SIZE bytes
        unsafe { (self.memory.as_ptr() as *mut u64).write(STACK_CANARY) }
    }

    /// Check if the stack canary is still intact.
    ///
    /// Returns `false` if the thread has written below its stack.
    pub fn check_canary(&self) -> bool {
        // Safety: see install_canary
        unsafe { (self.memory.as_ptr() as *const u64).read() == STACK_CANARY }
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        // Safety: memory was returned by alloc with this exact layout
        unsafe { dealloc(self.memory.as_ptr(), self.layout) }
    }
}

fn round_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(value.checked_add(align - 1)? & !(align - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    static IMAGE: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn test_stack_too_small() {
        let result = StackRegion::allocate(16, &TlsTemplate::empty());
        assert_eq!(result.err(), Some(SpawnError::InvalidStackSize(16)));
    }

    #[test]
    fn test_stack_allocation_failure() {
        let result = StackRegion::allocate(usize::MAX / 4, &TlsTemplate::empty());
        assert_eq!(result.err(), Some(SpawnError::OutOfMemory));

        let result = StackRegion::allocate(usize::MAX, &TlsTemplate::empty());
        assert_eq!(result.err(), Some(SpawnError::OutOfMemory));
    }

    #[test]
    fn test_stack_layout() {
        let region = StackRegion::allocate(4000, &TlsTemplate::empty()).unwrap();
        assert_eq!(region.size(), 4000);
        assert_eq!(region.top() as usize % STACK_ALIGN, 0);
        assert_eq!(region.top() as usize - region.base() as usize, region.size());
        assert!(region.check_canary());
    }

    #[test]
    fn test_tls_carved_at_top() {
        let tls = TlsTemplate::new(&IMAGE, 12, 8);
        let region = StackRegion::allocate(MIN_STACK_SIZE, &tls).unwrap();

        assert_eq!(region.allocation_size(), MIN_STACK_SIZE + 16);
        let block = unsafe { core::slice::from_raw_parts(region.tls_block(), 16) };
        assert_eq!(&block[..4], &IMAGE);
        assert!(block[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_stack_canary() {
        let region = StackRegion::allocate(MIN_STACK_SIZE, &TlsTemplate::empty()).unwrap();
        assert!(region.check_canary());

        unsafe { (region.base() as *mut u8).write(0) };
        assert!(!region.check_canary());
    }
}
