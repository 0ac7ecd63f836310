//! The per-core cooperative scheduler.
//!
//! A [`Kernel`] owns the thread table of one core. It is not a thread of
//! its own: the scheduler loop runs in whatever context calls
//! [`Kernel::run`] or [`Kernel::run_pass`] (usually the core's initial
//! context), and every suspended thread switches back into that context.
//!
//! The table lock is a short critical section around bookkeeping only. It
//! is always released before a context switch and never taken by
//! interrupt handlers, which only bump the atomic epochs in [`crate::irq`].

use crate::arch::{Arch, DefaultArch};
use crate::config::Config;
use crate::errors::{violation, ConfigError, ContractViolation, JoinError, SpawnError, ThreadResult};
use crate::irq::{InterruptId, InterruptLines};
use crate::mem::StackRegion;
use crate::sched::RoundRobin;
use crate::sync::SignalId;
use crate::thread::table::ThreadTable;
use crate::thread::{Detach, Tcb, ThreadHandle, ThreadState};
use alloc::boxed::Box;
use core::cell::UnsafeCell;
use portable_atomic::{AtomicPtr, AtomicUsize, Ordering};

/// `current` value while the scheduler context is executing.
const NO_THREAD: usize = usize::MAX;

/// Snapshot of the thread table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Occupied slots, joined threads included
    pub live: usize,
    /// Includes interrupt waiters whose line already fired
    pub runnable: usize,
    pub waiting_interrupt: usize,
    pub waiting_signal: usize,
    /// Joinable threads that returned and have not been deleted yet
    pub joined: usize,
}

impl Stats {
    /// Threads that have not returned from their entry function.
    pub fn active(&self) -> usize {
        self.live - self.joined
    }
}

struct State<A: Arch> {
    table: ThreadTable<A>,
    config: Config,
    rr: RoundRobin,
    /// Signal the scheduler context is parked on, if any
    main_signal: Option<SignalId>,
    /// Serial of the most recently created thread. Survives `configure`
    last_serial: u64,
}

/// Cooperative scheduler for one core.
pub struct Kernel<A: Arch = DefaultArch> {
    state: spin::Mutex<State<A>>,
    /// Saved context of the code driving the scheduler loop
    scheduler: UnsafeCell<A::SavedContext>,
    /// Slot index of the running thread, or NO_THREAD
    current: AtomicUsize,
    current_tls: AtomicPtr<u8>,
    irq: InterruptLines,
}

// Safety: a kernel is only driven by the core it belongs to. Other contexts
// (interrupt handlers, or host threads standing in for them) only reach the
// atomic interrupt epochs.
unsafe impl<A: Arch> Sync for Kernel<A> {}
unsafe impl<A: Arch> Send for Kernel<A> {}

impl<A: Arch> Kernel<A> {
    pub fn new(config: Config) -> Self {
        Self {
            state: spin::Mutex::new(State {
                table: ThreadTable::with_capacity(config.max_threads),
                config,
                rr: RoundRobin::new(),
                main_signal: None,
                last_serial: 0,
            }),
            scheduler: UnsafeCell::new(A::SavedContext::default()),
            current: AtomicUsize::new(NO_THREAD),
            current_tls: AtomicPtr::new(config.tls.main_block()),
            irq: InterruptLines::new(),
        }
    }

    /// Replace the configuration. Only allowed while the table is empty.
    pub fn configure(&self, config: Config) -> Result<(), ConfigError> {
        if config.max_threads == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let mut st = self.state.lock();
        let live = st.table.live();
        if live > 0 {
            return Err(ConfigError::ThreadsAlive(live));
        }

        st.table = ThreadTable::with_capacity(config.max_threads);
        st.config = config;
        st.rr = RoundRobin::new();
        self.current_tls.store(config.tls.main_block(), Ordering::Release);
        log::debug!(
            "scheduler configured: {} slots, {} byte default stack",
            config.max_threads,
            config.default_stack_size
        );
        Ok(())
    }

    /// Create a runnable thread that will run `entry(arg)` on its own stack.
    ///
    /// `stack_size` of `None` uses the configured default.
    pub fn create<F, T>(
        &'static self,
        entry: F,
        arg: T,
        stack_size: Option<usize>,
        detach: Detach,
    ) -> Result<ThreadHandle, SpawnError>
    where
        F: FnOnce(T) -> i32 + 'static,
        T: 'static,
    {
        let mut st = self.state.lock();
        if st.table.is_full() {
            log::debug!("thread table full ({} slots)", st.table.capacity());
            return Err(SpawnError::TooManyThreads);
        }

        let size = stack_size.unwrap_or(st.config.default_stack_size);
        let stack = StackRegion::allocate(size, &st.config.tls)?;
        let mut tcb = Box::new(Tcb::<A>::new(stack, detach, Box::new(move || entry(arg))));
        st.last_serial += 1;
        tcb.serial = st.last_serial;

        let top = tcb.stack.top();
        // Safety: the stack belongs to the block and lives as long as the context
        unsafe {
            A::init_context(
                tcb.context.get_mut(),
                top,
                thread_main::<A>,
                self as *const Self as usize,
            );
        }

        let handle = st.table.insert(tcb)?;
        log::debug!("created thread {} ({} byte stack, {:?})", handle, size, detach);
        Ok(handle)
    }

    /// Whether `handle` names a thread that returned from its entry function.
    ///
    /// False for free slots, including detached threads already reclaimed.
    pub fn has_joined(&self, handle: ThreadHandle) -> bool {
        self.state.lock().table.get(handle).is_some_and(Tcb::has_joined)
    }

    /// Value returned by the thread's entry function.
    ///
    /// Reading it before the thread joined is a contract violation.
    pub fn exit_code(&self, handle: ThreadHandle) -> Result<i32, JoinError> {
        let code = {
            let st = self.state.lock();
            st.table
                .get(handle)
                .map(|tcb| tcb.has_joined().then_some(tcb.exit_code))
        };

        match code {
            None => Err(JoinError::InvalidHandle),
            Some(Some(code)) => Ok(code),
            Some(None) => {
                violation(ContractViolation::ExitCodeBeforeJoin);
                Err(JoinError::StillRunning)
            }
        }
    }

    /// Release the thread's stack and slot.
    ///
    /// Joinable threads must have joined. A detached thread may be deleted
    /// at any time, except by itself.
    pub fn delete(&self, handle: ThreadHandle) -> ThreadResult<()> {
        let removed = {
            let mut st = self.state.lock();
            let check = match st.table.get(handle) {
                None => Err(ContractViolation::DoubleDelete),
                Some(_) if self.current_handle() == Some(handle) => Err(ContractViolation::DeleteCurrent),
                Some(tcb) if !tcb.has_joined() && tcb.detach == Detach::Joinable => {
                    Err(ContractViolation::DeleteNotJoined)
                }
                Some(_) => Ok(()),
            };
            check.map(|()| st.table.remove(handle))
        };

        match removed {
            Ok(tcb) => {
                // Stack freed outside the lock
                drop(tcb);
                log::debug!("deleted thread {}", handle);
                Ok(())
            }
            Err(kind) => Err(violation(kind).into()),
        }
    }

    /// Scheduling state of `handle`, `None` for a free slot.
    pub fn state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.state.lock().table.get(handle).map(|tcb| tcb.state)
    }

    pub fn stats(&self) -> Stats {
        let st = self.state.lock();
        let mut stats = Stats {
            live: st.table.live(),
            ..Stats::default()
        };
        for (_, tcb) in st.table.iter() {
            match tcb.state {
                ThreadState::Runnable => stats.runnable += 1,
                // Fired, but not yet seen by a pass
                ThreadState::WaitingForInterrupt(_) if self.is_ready(tcb) => stats.runnable += 1,
                ThreadState::WaitingForInterrupt(_) => stats.waiting_interrupt += 1,
                ThreadState::WaitingForSignal(_) => stats.waiting_signal += 1,
                ThreadState::Joined => stats.joined += 1,
            }
        }
        stats
    }

    /// The running thread, or `None` in the scheduler context.
    pub fn current_handle(&self) -> Option<ThreadHandle> {
        match self.current.load(Ordering::Acquire) {
            NO_THREAD => None,
            index => Some(ThreadHandle::from_index(index)),
        }
    }

    /// Serial of the running thread, `None` in the scheduler context.
    ///
    /// Unlike the handle it is never reused, so it can name the owner of a
    /// resource that outlives the thread.
    pub(crate) fn current_serial(&self) -> Option<u64> {
        let handle = self.current_handle()?;
        let serial = self.state.lock().table.get(handle).map(|tcb| tcb.serial);
        serial
    }

    /// TLS block of the running context.
    ///
    /// Threads get their private copy; the scheduler context gets the
    /// configured main block (null if none was configured).
    pub fn tls_base(&self) -> *mut u8 {
        self.current_tls.load(Ordering::Acquire)
    }

    pub(crate) fn interrupts(&self) -> &InterruptLines {
        &self.irq
    }

    /// Record a firing of `id`. Safe to call from interrupt context.
    pub fn notify_interrupt(&self, id: InterruptId) {
        self.irq.notify(id);
    }

    /// Record a firing of every line set in `mask`.
    pub fn notify_interrupts(&self, mask: u64) {
        self.irq.notify_mask(mask);
    }

    // ------------------------------------------------------------------
    // Scheduler loop
    // ------------------------------------------------------------------

    /// Run passes until one of them resumes nothing.
    pub fn run(&self) -> Stats {
        while self.run_pass() > 0 {}
        let stats = self.stats();
        log::debug!("scheduler quiescent: {:?}", stats);
        stats
    }

    /// One round-robin sweep over the table, starting after the slot that
    /// was resumed last. Each runnable thread is resumed at most once.
    ///
    /// Returns the number of threads resumed.
    pub fn run_pass(&self) -> usize {
        if self.current_handle().is_some() {
            violation(ContractViolation::NestedRun);
            return 0;
        }

        let (start, capacity) = {
            let st = self.state.lock();
            let capacity = st.table.capacity();
            (st.rr.start(capacity), capacity)
        };

        let mut resumed = 0;
        for step in 0..capacity {
            if self.resume(ThreadHandle::from_index((start + step) % capacity)) {
                resumed += 1;
            }
        }
        resumed
    }

    /// Switch to `handle` if it is eligible. Returns after it suspends.
    fn resume(&self, handle: ThreadHandle) -> bool {
        let next = {
            let mut st = self.state.lock();
            let State { table, rr, .. } = &mut *st;
            let Some(tcb) = table.get_mut(handle) else {
                return false;
            };
            self.refresh_interrupt_wait(tcb);
            if tcb.state != ThreadState::Runnable {
                return false;
            }
            rr.resumed(handle.index());
            self.current_tls.store(tcb.stack.tls_block(), Ordering::Release);
            tcb.context.get()
        };

        self.current.store(handle.index(), Ordering::Release);
        log::trace!("switching to thread {}", handle);
        // Safety: the block is boxed, so `next` stays put, and it cannot be
        // deleted while it is the current thread
        unsafe { A::context_switch(self.scheduler.get(), next) };
        self.current.store(NO_THREAD, Ordering::Release);

        self.after_resume(handle);
        true
    }

    /// Bookkeeping in the scheduler context after a thread switched back.
    fn after_resume(&self, handle: ThreadHandle) {
        let reclaimed = {
            let mut st = self.state.lock();
            self.current_tls.store(st.config.tls.main_block(), Ordering::Release);

            let Some((intact, reclaimable)) = st
                .table
                .get(handle)
                .map(|tcb| (tcb.stack.check_canary(), tcb.reclaimable()))
            else {
                return;
            };
            if !intact {
                log::warn!("stack overflow detected in thread {}", handle);
            }
            if reclaimable {
                st.table.remove(handle)
            } else {
                None
            }
        };

        if let Some(tcb) = reclaimed {
            log::debug!("reclaimed detached thread {} (exit code {})", handle, tcb.exit_code);
        }
    }

    /// Turn an interrupt wait whose line fired since it began into `Runnable`.
    fn refresh_interrupt_wait(&self, tcb: &mut Tcb<A>) {
        if let ThreadState::WaitingForInterrupt(id) = tcb.state {
            if self.irq.epoch(id) != tcb.irq_epoch {
                tcb.state = ThreadState::Runnable;
            }
        }
    }

    /// Whether the scheduler would resume `tcb` on its next visit.
    fn is_ready(&self, tcb: &Tcb<A>) -> bool {
        match tcb.state {
            ThreadState::Runnable => true,
            ThreadState::WaitingForInterrupt(id) => self.irq.epoch(id) != tcb.irq_epoch,
            _ => false,
        }
    }

    /// Drive passes from the scheduler context until `done` holds, idling
    /// the core while nothing is runnable.
    fn drive_until(&self, mut done: impl FnMut(&Self) -> bool) {
        loop {
            let resumed = self.run_pass();
            if done(self) {
                return;
            }
            if resumed == 0 {
                A::idle_unless(|| done(self));
            }
        }
    }

    // ------------------------------------------------------------------
    // Suspension primitives
    // ------------------------------------------------------------------

    /// Put the running thread into `state` and switch to the scheduler.
    fn park(&self, handle: ThreadHandle, state: ThreadState) {
        let prev = {
            let mut st = self.state.lock();
            let Some(tcb) = st.table.get_mut(handle) else {
                return;
            };
            if let ThreadState::WaitingForInterrupt(id) = state {
                tcb.irq_epoch = self.irq.epoch(id);
            }
            tcb.state = state;
            tcb.context.get()
        };

        // Safety: see `resume`; the scheduler context is suspended inside it
        unsafe { A::context_switch(prev, self.scheduler.get()) };
    }

    /// Let the other threads run once. The caller stays runnable.
    ///
    /// From the scheduler context, runs exactly one pass.
    pub fn yield_now(&self) {
        match self.current_handle() {
            Some(handle) => self.park(handle, ThreadState::Runnable),
            None => {
                self.run_pass();
            }
        }
    }

    /// Suspend until the next firing of `id` after this call.
    pub fn yield_until_interrupt(&self, id: InterruptId) {
        match self.current_handle() {
            Some(handle) => self.park(handle, ThreadState::WaitingForInterrupt(id)),
            None => {
                let start = self.irq.epoch(id);
                self.drive_until(|k| k.irq.epoch(id) != start);
            }
        }
    }

    /// Suspend until `id` is sent with [`Kernel::send_signal`].
    pub fn yield_until_signal(&self, id: SignalId) {
        match self.current_handle() {
            Some(handle) => self.park(handle, ThreadState::WaitingForSignal(id)),
            None => {
                self.state.lock().main_signal = Some(id);
                self.drive_until(|k| k.state.lock().main_signal != Some(id));
            }
        }
    }

    /// Make every context waiting for `id` runnable. Does not yield.
    ///
    /// Returns the number of contexts woken.
    pub fn send_signal(&self, id: SignalId) -> usize {
        let mut st = self.state.lock();
        let mut woken = 0;
        for (_, tcb) in st.table.iter_mut() {
            if tcb.state == ThreadState::WaitingForSignal(id) {
                tcb.state = ThreadState::Runnable;
                woken += 1;
            }
        }
        if st.main_signal == Some(id) {
            st.main_signal = None;
            woken += 1;
        }
        woken
    }

    /// Yield if anything else can run, otherwise wait for any interrupt.
    pub fn sleep(&self) {
        match self.current_handle() {
            Some(handle) => {
                let others = {
                    let st = self.state.lock();
                    let others = st
                        .table
                        .iter()
                        .any(|(other, tcb)| other != handle && self.is_ready(tcb));
                    others
                };
                let state = if others {
                    ThreadState::Runnable
                } else {
                    ThreadState::WaitingForInterrupt(InterruptId::ANY)
                };
                self.park(handle, state);
            }
            None => {
                let start = self.irq.epoch(InterruptId::ANY);
                if self.run_pass() == 0 {
                    while self.irq.epoch(InterruptId::ANY) == start {
                        A::idle_unless(|| self.irq.epoch(InterruptId::ANY) != start);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Thread side
    // ------------------------------------------------------------------

    /// Body of every thread: run the entry function once, then join.
    fn run_entry(&self) -> ! {
        let entry = self
            .current_handle()
            .and_then(|handle| self.state.lock().table.get_mut(handle)?.entry.take());
        let code = entry.map_or(0, |f| f());
        self.exit_current(code)
    }

    fn exit_current(&self, code: i32) -> ! {
        let handle = self.current_handle();
        let prev = {
            let mut st = self.state.lock();
            let tcb = match handle {
                Some(h) => st.table.get_mut(h),
                None => None,
            };
            tcb.map(|tcb| {
                tcb.state = ThreadState::Joined;
                tcb.exit_code = code;
                tcb.context.get()
            })
        };

        if let Some(prev) = prev {
            log::trace!("thread {:?} returned {}", handle, code);
            // Safety: see `park`
            unsafe { A::context_switch(prev, self.scheduler.get()) };
        }

        // Joined threads are never resumed
        loop {
            A::wait_for_interrupt();
        }
    }
}

extern "C" fn thread_main<A: Arch>(kernel: usize) -> ! {
    // Safety: `create` passes the address of a `&'static Kernel<A>`
    let kernel = unsafe { &*(kernel as *const Kernel<A>) };
    kernel.run_entry()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    fn leaked(config: Config) -> &'static Kernel {
        Box::leak(Box::new(Kernel::new(config)))
    }

    #[test]
    fn test_create_and_run_to_join() {
        let kernel = leaked(Config::new().max_threads(4));
        let handle = kernel.create(|x: i32| x * 2, 21, None, Detach::Joinable).unwrap();

        assert_eq!(kernel.state(handle), Some(ThreadState::Runnable));
        assert!(!kernel.has_joined(handle));

        let stats = kernel.run();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.joined, 1);
        assert_eq!(stats.active(), 0);
        assert!(kernel.has_joined(handle));
        assert_eq!(kernel.exit_code(handle), Ok(42));

        kernel.delete(handle).unwrap();
        assert_eq!(kernel.stats().live, 0);
        assert_eq!(kernel.exit_code(handle), Err(JoinError::InvalidHandle));
    }

    #[test]
    fn test_table_full() {
        let kernel = leaked(Config::new().max_threads(2));
        kernel.create(|()| 0, (), None, Detach::Joinable).unwrap();
        kernel.create(|()| 0, (), None, Detach::Joinable).unwrap();
        let err = kernel.create(|()| 0, (), None, Detach::Joinable);
        assert_eq!(err, Err(SpawnError::TooManyThreads));
        kernel.run();
    }

    #[test]
    fn test_stack_size_errors() {
        let kernel = leaked(Config::new());
        let err = kernel.create(|()| 0, (), Some(64), Detach::Joinable);
        assert_eq!(err, Err(SpawnError::InvalidStackSize(64)));
        let err = kernel.create(|()| 0, (), Some(usize::MAX / 2), Detach::Joinable);
        assert_eq!(err, Err(SpawnError::OutOfMemory));
        assert_eq!(kernel.stats().live, 0);
    }

    #[test]
    fn test_yield_alternates_threads() {
        let kernel = leaked(Config::new());
        let trace = Rc::new(Cell::new(0u32));

        for tag in 1..=2u32 {
            let trace = trace.clone();
            kernel
                .create(
                    move |()| {
                        for _ in 0..3 {
                            trace.set(trace.get() * 10 + tag);
                            kernel.yield_now();
                        }
                        0
                    },
                    (),
                    None,
                    Detach::Detached,
                )
                .unwrap();
        }

        kernel.run();
        assert_eq!(trace.get(), 121212);
        assert_eq!(kernel.stats().live, 0);
    }

    #[test]
    fn test_outside_yield_runs_one_pass() {
        let kernel = leaked(Config::new());
        let steps = Rc::new(Cell::new(0));
        let counter = steps.clone();
        let handle = kernel
            .create(
                move |()| {
                    loop {
                        counter.set(counter.get() + 1);
                        if counter.get() == 3 {
                            return 7;
                        }
                        kernel.yield_now();
                    }
                },
                (),
                None,
                Detach::Joinable,
            )
            .unwrap();

        kernel.yield_now();
        assert_eq!(steps.get(), 1);
        kernel.yield_now();
        assert_eq!(steps.get(), 2);
        kernel.yield_now();
        assert!(kernel.has_joined(handle));
        assert_eq!(kernel.exit_code(handle), Ok(7));
        kernel.delete(handle).unwrap();
    }

    #[test]
    fn test_current_handle_inside_thread() {
        let kernel = leaked(Config::new());
        let seen = Rc::new(Cell::new(None));
        let slot = seen.clone();
        let handle = kernel
            .create(
                move |()| {
                    slot.set(kernel.current_handle());
                    0
                },
                (),
                None,
                Detach::Joinable,
            )
            .unwrap();

        assert_eq!(kernel.current_handle(), None);
        kernel.run();
        assert_eq!(seen.get(), Some(handle));
        kernel.delete(handle).unwrap();
    }

    #[test]
    fn test_configure_requires_empty_table() {
        let kernel = leaked(Config::new());
        assert_eq!(kernel.configure(Config::new().max_threads(0)), Err(ConfigError::ZeroCapacity));

        let handle = kernel.create(|()| 0, (), None, Detach::Joinable).unwrap();
        assert_eq!(kernel.configure(Config::new()), Err(ConfigError::ThreadsAlive(1)));

        kernel.run();
        kernel.delete(handle).unwrap();
        kernel.configure(Config::new().max_threads(1)).unwrap();
        kernel.create(|()| 0, (), None, Detach::Detached).unwrap();
        assert_eq!(
            kernel.create(|()| 0, (), None, Detach::Detached),
            Err(SpawnError::TooManyThreads)
        );
        kernel.run();
    }

    #[test]
    fn test_send_signal_counts_woken() {
        let kernel = leaked(Config::new());
        let signal = SignalId::new(3);
        for _ in 0..3 {
            kernel
                .create(
                    move |()| {
                        kernel.yield_until_signal(signal);
                        0
                    },
                    (),
                    None,
                    Detach::Detached,
                )
                .unwrap();
        }

        let stats = kernel.run();
        assert_eq!(stats.waiting_signal, 3);
        assert_eq!(kernel.send_signal(SignalId::new(4)), 0);
        assert_eq!(kernel.send_signal(signal), 3);
        assert_eq!(kernel.run().live, 0);
    }

    #[test]
    fn test_outside_waits_for_signal() {
        let kernel = leaked(Config::new());
        let signal = SignalId::new(1);
        kernel
            .create(
                move |()| {
                    for _ in 0..5 {
                        kernel.yield_now();
                    }
                    kernel.send_signal(signal);
                    0
                },
                (),
                None,
                Detach::Detached,
            )
            .unwrap();

        kernel.yield_until_signal(signal);
        assert_eq!(kernel.run().live, 0);
    }

    #[test]
    fn test_nested_run_is_refused() {
        let kernel = leaked(Config::new());
        // The violation is only observable in release builds: a panic inside
        // a thread would abort the test binary.
        if cfg!(debug_assertions) {
            return;
        }
        let resumed = Rc::new(Cell::new(usize::MAX));
        let out = resumed.clone();
        kernel
            .create(
                move |()| {
                    out.set(kernel.run_pass());
                    0
                },
                (),
                None,
                Detach::Detached,
            )
            .unwrap();
        kernel.run();
        assert_eq!(resumed.get(), 0);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "contract violation"))]
    fn test_exit_code_before_join() {
        let kernel = leaked(Config::new());
        let handle = kernel.create(|()| 0, (), None, Detach::Joinable).unwrap();
        assert_eq!(kernel.exit_code(handle), Err(JoinError::StillRunning));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "contract violation"))]
    fn test_delete_before_join() {
        let kernel = leaked(Config::new());
        let handle = kernel.create(|()| 0, (), None, Detach::Joinable).unwrap();
        let err = kernel.delete(handle);
        assert_eq!(err, Err(ContractViolation::DeleteNotJoined.into()));
        assert_eq!(kernel.state(handle), Some(ThreadState::Runnable));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "contract violation"))]
    fn test_double_delete() {
        let kernel = leaked(Config::new());
        let handle = kernel.create(|()| 0, (), None, Detach::Joinable).unwrap();
        kernel.run();
        kernel.delete(handle).unwrap();
        let err = kernel.delete(handle);
        assert_eq!(err, Err(ContractViolation::DoubleDelete.into()));
    }

    #[test]
    fn test_delete_unstarted_detached_thread() {
        let kernel = leaked(Config::new());
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let handle = kernel
            .create(
                move |()| {
                    flag.set(true);
                    0
                },
                (),
                None,
                Detach::Detached,
            )
            .unwrap();

        kernel.delete(handle).unwrap();
        kernel.run();
        assert!(!ran.get());
        // The closure and its captures are gone
        assert_eq!(Rc::strong_count(&ran), 1);
    }

    #[test]
    fn test_reused_slot_gets_new_serial() {
        let kernel = leaked(Config::new().max_threads(1));
        let seen = Rc::new(RefCell::new(Vec::new()));

        for _ in 0..2 {
            let seen = seen.clone();
            kernel
                .create(
                    move |()| {
                        seen.borrow_mut().push((kernel.current_handle(), kernel.current_serial()));
                        0
                    },
                    (),
                    None,
                    Detach::Detached,
                )
                .unwrap();
            kernel.run();
        }

        let seen = seen.borrow();
        assert_eq!(seen[0].0, seen[1].0);
        assert!(seen[0].1.is_some() && seen[1].1.is_some());
        assert_ne!(seen[0].1, seen[1].1);
        assert_eq!(kernel.current_serial(), None);

        // Serials keep counting across a reconfigure
        kernel.configure(Config::new().max_threads(1)).unwrap();
        let later = Rc::new(Cell::new(None));
        let slot = later.clone();
        kernel
            .create(
                move |()| {
                    slot.set(kernel.current_serial());
                    0
                },
                (),
                None,
                Detach::Detached,
            )
            .unwrap();
        kernel.run();
        assert!(later.get() > seen[1].1);
    }

    #[test]
    fn test_stats_count_fired_interrupt_wait_as_runnable() {
        let kernel = leaked(Config::new());
        let line = InterruptId::new(6);
        kernel
            .create(
                move |()| {
                    kernel.yield_until_interrupt(line);
                    0
                },
                (),
                None,
                Detach::Detached,
            )
            .unwrap();

        let stats = kernel.run();
        assert_eq!((stats.runnable, stats.waiting_interrupt), (0, 1));

        kernel.notify_interrupt(line);
        let stats = kernel.stats();
        assert_eq!((stats.runnable, stats.waiting_interrupt), (1, 0));
        assert_eq!(kernel.run().live, 0);
    }

    /// Delivers a pending interrupt at the last moment before the core
    /// would idle, and counts the idles that actually happen.
    struct LateIrqArch;

    std::thread_local! {
        static LATE_IRQ: Cell<Option<(&'static Kernel<LateIrqArch>, InterruptId)>> = const { Cell::new(None) };
        static IDLES: Cell<usize> = const { Cell::new(0) };
    }

    impl Arch for LateIrqArch {
        type SavedContext = <DefaultArch as Arch>::SavedContext;

        unsafe fn init_context(
            ctx: &mut Self::SavedContext,
            stack_top: *mut u8,
            entry: crate::arch::ThreadEntry,
            arg: usize,
        ) {
            unsafe { DefaultArch::init_context(ctx, stack_top, entry, arg) }
        }

        unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
            unsafe { DefaultArch::context_switch(prev, next) }
        }

        fn wait_for_interrupt() {
            IDLES.with(|idles| idles.set(idles.get() + 1));
        }

        fn idle_unless(ready: impl FnOnce() -> bool) {
            if let Some((kernel, id)) = LATE_IRQ.with(Cell::take) {
                kernel.notify_interrupt(id);
            }
            if !ready() {
                Self::wait_for_interrupt();
            }
        }
    }

    #[test]
    fn test_interrupt_just_before_idle_is_not_lost() {
        let kernel: &'static Kernel<LateIrqArch> = Box::leak(Box::new(Kernel::new(Config::new())));
        let line = InterruptId::new(9);

        LATE_IRQ.with(|late| late.set(Some((kernel, line))));
        kernel.yield_until_interrupt(line);
        assert_eq!(IDLES.with(Cell::get), 0);

        LATE_IRQ.with(|late| late.set(Some((kernel, line))));
        kernel.sleep();
        assert_eq!(IDLES.with(Cell::get), 0);
    }
}
