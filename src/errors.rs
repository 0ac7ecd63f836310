//! Error types for the cooperative threading system.
//!
//! Resource exhaustion is reported to the caller of `create`. Contract
//! violations (misuse of a handle or a mutex) are caller bugs: they are
//! logged, trip a debug assertion in debug builds, and are refused with an
//! error in release builds.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Top-level error type for all threading operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread creation errors
    Spawn(SpawnError),
    /// Exit code / join errors
    Join(JoinError),
    /// Caller broke the usage contract of a handle or a mutex
    Contract(ContractViolation),
    /// Scheduler configuration errors
    Config(ConfigError),
}

/// Errors that can occur during thread creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Every slot of the thread table is in use
    TooManyThreads,
    /// The stack region could not be allocated
    OutOfMemory,
    /// Requested stack size is below the minimum
    InvalidStackSize(usize),
}

/// Errors returned when querying a thread's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// Thread has not returned from its entry function yet
    StillRunning,
    /// Handle does not name a live thread
    InvalidHandle,
}

/// Usage contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    /// `delete` on a joinable thread that has not joined
    DeleteNotJoined,
    /// `delete` on the thread that is currently executing
    DeleteCurrent,
    /// `delete` on a slot that holds no thread
    DoubleDelete,
    /// `exit_code` read before the thread joined
    ExitCodeBeforeJoin,
    /// Mutex released by a context that does not hold it
    ReleaseNotHeld,
    /// Scheduler loop entered from inside a cooperative thread
    NestedRun,
}

/// Configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration can only change while no thread is alive
    ThreadsAlive(usize),
    /// Table capacity must be at least one slot
    ZeroCapacity,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Spawn(e) => write!(f, "Thread spawn error: {}", e),
            ThreadError::Join(e) => write!(f, "Thread join error: {}", e),
            ThreadError::Contract(e) => write!(f, "Contract violation: {}", e),
            ThreadError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            SpawnError::OutOfMemory => write!(f, "Out of memory for thread stack"),
            SpawnError::InvalidStackSize(size) => write!(f, "Invalid stack size: {}", size),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::StillRunning => write!(f, "Thread is still running"),
            JoinError::InvalidHandle => write!(f, "Invalid thread handle"),
        }
    }
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::DeleteNotJoined => write!(f, "deleting a joinable thread that has not joined"),
            ContractViolation::DeleteCurrent => write!(f, "deleting the running thread"),
            ContractViolation::DoubleDelete => write!(f, "deleting a handle that is not alive"),
            ContractViolation::ExitCodeBeforeJoin => write!(f, "reading the exit code of a thread that has not joined"),
            ContractViolation::ReleaseNotHeld => write!(f, "releasing a mutex that is not held by the caller"),
            ContractViolation::NestedRun => write!(f, "scheduler loop entered from a cooperative thread"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ThreadsAlive(n) => write!(f, "{} threads still alive", n),
            ConfigError::ZeroCapacity => write!(f, "thread table needs at least one slot"),
        }
    }
}

impl From<SpawnError> for ThreadError {
    fn from(err: SpawnError) -> Self {
        ThreadError::Spawn(err)
    }
}

impl From<JoinError> for ThreadError {
    fn from(err: JoinError) -> Self {
        ThreadError::Join(err)
    }
}

impl From<ContractViolation> for ThreadError {
    fn from(err: ContractViolation) -> Self {
        ThreadError::Contract(err)
    }
}

impl From<ConfigError> for ThreadError {
    fn from(err: ConfigError) -> Self {
        ThreadError::Config(err)
    }
}

impl core::error::Error for ThreadError {}
impl core::error::Error for SpawnError {}
impl core::error::Error for JoinError {}
impl core::error::Error for ContractViolation {}
impl core::error::Error for ConfigError {}

/// Report a contract violation.
///
/// Logs the violation and panics in debug builds. In release builds the
/// violation is returned so the caller can refuse the operation.
#[track_caller]
pub(crate) fn violation(kind: ContractViolation) -> ContractViolation {
    log::error!("contract violation: {}", kind);
    if cfg!(debug_assertions) {
        panic!("contract violation: {}", kind);
    }
    kind
}
