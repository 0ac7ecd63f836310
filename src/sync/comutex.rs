//! Cooperative mutex.
//!
//! Contention parks the caller on a signal id private to the mutex; a
//! release broadcasts that signal and every waiter rechecks the holder. The
//! mutex belongs to the core it is used on and is not fair: a thread that
//! releases and immediately re-acquires without yielding keeps the lock.

use super::SignalId;
use crate::errors::{violation, ContractViolation};
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use portable_atomic::{AtomicU64, AtomicUsize, Ordering};

const UNHELD: u64 = u64::MAX;
/// Holder value of the scheduler context. Thread serials start at 1.
const SCHEDULER: u64 = 0;

/// Holder identity of the calling context. Threads are named by serial, so
/// a thread that later takes over a reclaimed slot is a different holder.
fn caller() -> u64 {
    crate::percpu::kernel().current_serial().unwrap_or(SCHEDULER)
}

/// Mutex without data, for guarding state the caller manages itself.
pub struct RawCoMutex {
    holder: AtomicU64,
    waiters: AtomicUsize,
}

impl RawCoMutex {
    pub const fn new() -> Self {
        Self {
            holder: AtomicU64::new(UNHELD),
            waiters: AtomicUsize::new(0),
        }
    }

    fn signal(&self) -> SignalId {
        SignalId::private(self as *const Self as usize)
    }

    /// Acquire the mutex if it is free. Never yields.
    pub fn try_acquire(&self) -> bool {
        self.holder
            .compare_exchange(UNHELD, caller(), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire the mutex, yielding until it is released as often as needed.
    ///
    /// Re-acquiring a mutex the caller already holds never returns.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            self.waiters.fetch_add(1, Ordering::Relaxed);
            crate::yield_until_signal(self.signal());
            self.waiters.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Release the mutex and wake every context waiting for it.
    ///
    /// Releasing a mutex the caller does not hold is a contract violation.
    pub fn release(&self) {
        if self
            .holder
            .compare_exchange(caller(), UNHELD, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            violation(ContractViolation::ReleaseNotHeld);
            return;
        }
        if self.waiters.load(Ordering::Relaxed) > 0 {
            crate::send_signal(self.signal());
        }
    }

    pub fn is_locked(&self) -> bool {
        self.holder.load(Ordering::Relaxed) != UNHELD
    }

    /// Number of contexts parked in `acquire`.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}

impl Default for RawCoMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawCoMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCoMutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters())
            .finish()
    }
}

/// Cooperative mutex owning the data it protects.
pub struct CoMutex<T: ?Sized> {
    raw: RawCoMutex,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `raw`
unsafe impl<T: ?Sized + Send> Send for CoMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for CoMutex<T> {}

impl<T> CoMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawCoMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> CoMutex<T> {
    /// Acquire the mutex, yielding while another context holds it.
    pub fn lock(&self) -> CoMutexGuard<'_, T> {
        self.raw.acquire();
        CoMutexGuard::new(self)
    }

    pub fn try_lock(&self) -> Option<CoMutexGuard<'_, T>> {
        self.raw.try_acquire().then(|| CoMutexGuard::new(self))
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn waiters(&self) -> usize {
        self.raw.waiters()
    }

    /// The underlying raw mutex.
    pub fn raw(&self) -> &RawCoMutex {
        &self.raw
    }
}

impl<T: Default> Default for CoMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for CoMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoMutex").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// Held lock on a [`CoMutex`]. Releases on drop.
///
/// Bound to the context that acquired it.
pub struct CoMutexGuard<'a, T: ?Sized> {
    mutex: &'a CoMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> CoMutexGuard<'a, T> {
    fn new(mutex: &'a CoMutex<T>) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }
}

impl<T: ?Sized> Deref for CoMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves the mutex is held
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for CoMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves the mutex is held
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for CoMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.release();
    }
}
