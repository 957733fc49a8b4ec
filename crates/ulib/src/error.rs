//! Error types returned to user code.

use core::fmt;

use mmu::VirtualAddress;

/// Failure reported by a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// The environment does not exist or the caller may not touch it.
    BadEnv,
    /// Invalid address, permission or argument.
    Invalid,
    /// No physical frame was available.
    NoMemory,
    /// The environment table is full.
    NoFreeEnv,
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadEnv => f.write_str("bad environment"),
            Self::Invalid => f.write_str("invalid parameter"),
            Self::NoMemory => f.write_str("out of memory"),
            Self::NoFreeEnv => f.write_str("out of environments"),
        }
    }
}

/// Failure of a user memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The access faulted and the fault could not be resolved; the environment is gone.
    Destroyed,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Destroyed => f.write_str("environment destroyed by unhandled fault"),
        }
    }
}

/// Why the page fault upcall refused or failed to handle a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The faulting access was a read.
    NotWrite { va: VirtualAddress },
    /// The faulting page is not a present copy-on-write page.
    NotCow { va: VirtualAddress },
    /// A syscall made by the handler failed.
    Syscall(SysError),
    /// Copying the page failed.
    Memory(MemoryError),
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWrite { va } => write!(f, "fault at {} not caused by a write", va),
            Self::NotCow { va } => write!(f, "fault at {} not on a copy-on-write page", va),
            Self::Syscall(err) => write!(f, "page fault handler syscall failed: {}", err),
            Self::Memory(err) => write!(f, "page fault handler copy failed: {}", err),
        }
    }
}

impl From<SysError> for FaultError {
    fn from(err: SysError) -> Self {
        Self::Syscall(err)
    }
}

impl From<MemoryError> for FaultError {
    fn from(err: MemoryError) -> Self {
        Self::Memory(err)
    }
}

/// Which step of fork failed. Fork is all-or-nothing; none of these is recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    /// Installing the caller's own fault handler failed.
    Handler(SysError),
    /// The kernel could not create the child.
    Create(SysError),
    /// Sharing the page at `va` with the child failed.
    Duplicate { va: VirtualAddress, err: SysError },
    /// Allocating the child's exception stack failed.
    ExceptionStack(SysError),
    /// Registering the child's fault upcall failed.
    Upcall(SysError),
    /// Marking the child runnable failed.
    Status(SysError),
    /// The child could not refresh its identity slot.
    Identity(MemoryError),
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(err) => write!(f, "fork: installing fault handler: {}", err),
            Self::Create(err) => write!(f, "fork: creating environment: {}", err),
            Self::Duplicate { va, err } => write!(f, "fork: duplicating page {}: {}", va, err),
            Self::ExceptionStack(err) => write!(f, "fork: allocating exception stack: {}", err),
            Self::Upcall(err) => write!(f, "fork: setting fault upcall: {}", err),
            Self::Status(err) => write!(f, "fork: setting status: {}", err),
            Self::Identity(err) => write!(f, "fork: refreshing identity: {}", err),
        }
    }
}

/// General failure of user library code outside fork and fault handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Sys(SysError),
    Memory(MemoryError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sys(err) => fmt::Display::fmt(err, f),
            Self::Memory(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<SysError> for Error {
    fn from(err: SysError) -> Self {
        Self::Sys(err)
    }
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        Self::Memory(err)
    }
}
