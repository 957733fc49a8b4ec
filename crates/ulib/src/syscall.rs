//! The narrow interface between an environment and the kernel.
//!
//! Everything a user environment can ask of the kernel is a method on [`Syscalls`].
//! Memory accesses go through [`UserMemory`] so the platform can raise page faults, and
//! the page tables are visible only through the by-value [`PageTableWindow`].

use alloc::boxed::Box;
use core::fmt;

use mmu::{PageEntry, PageFlags, VirtualAddress};

use crate::{
    error::{MemoryError, SysError},
    trap::UpcallEntry,
};

/// Identifies an environment.
///
/// Kernel-issued ids are never zero; [`EnvId::SELF`] is the sentinel that names the
/// calling environment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// Names the caller in any syscall that takes an environment id.
    pub const SELF: Self = Self(0);

    /// Creates an id from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the caller sentinel.
    pub const fn is_self(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Scheduling state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// The slot is unused.
    Free,
    /// Destroyed while running; reclaimed once it stops running.
    Dying,
    /// Waiting to be scheduled.
    Runnable,
    /// Currently executing.
    Running,
    /// Exists but must not be scheduled.
    NotRunnable,
}

/// Code to run when a freshly created environment is first scheduled.
pub type ChildEntry = Box<dyn FnOnce(&dyn Environment)>;

/// System calls available to an environment. All of them may fail.
///
/// Any `EnvId` argument may be [`EnvId::SELF`].
pub trait Syscalls {
    /// Returns the caller's own id.
    fn current_context_id(&self) -> EnvId;

    /// Creates a new, not-runnable environment whose registers are copied from the
    /// caller's. The caller gets the new id back; `entry` runs inside the new
    /// environment when it is first scheduled.
    fn create_context(&self, entry: ChildEntry) -> Result<EnvId, SysError>;

    /// Backs the page at `va` in `env` with a fresh zeroed frame, replacing any mapping.
    fn alloc_page(&self, env: EnvId, va: VirtualAddress, perm: PageFlags) -> Result<(), SysError>;

    /// Maps the frame behind `src_va` in `src_env` at `dst_va` in `dst_env`.
    fn map_page(
        &self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: PageFlags,
    ) -> Result<(), SysError>;

    /// Removes the mapping at `va` in `env`. Unmapping an absent page succeeds.
    fn unmap_page(&self, env: EnvId, va: VirtualAddress) -> Result<(), SysError>;

    /// Registers the page fault upcall of `env`.
    fn set_fault_upcall(&self, env: EnvId, upcall: UpcallEntry) -> Result<(), SysError>;

    /// Registers the caller's own page fault upcall.
    fn set_fault_handler(&self, upcall: UpcallEntry) -> Result<(), SysError> {
        self.set_fault_upcall(EnvId::SELF, upcall)
    }

    /// Marks `env` runnable or not runnable.
    fn set_status(&self, env: EnvId, status: EnvStatus) -> Result<(), SysError>;

    /// Destroys `env`.
    fn destroy(&self, env: EnvId) -> Result<(), SysError>;

    /// Writes a string to the console.
    fn cputs(&self, s: &str);
}

/// Loads and stores as performed by user code, subject to page protection.
///
/// A faulting access is delivered to the environment's upcall and retried; these methods
/// only fail if the fault could not be resolved and the environment was destroyed.
pub trait UserMemory {
    /// Reads `buf.len()` bytes starting at `va`.
    fn read(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Writes `data` starting at `va`.
    fn write(&self, va: VirtualAddress, data: &[u8]) -> Result<(), MemoryError>;
}

/// Read-only window onto the caller's page directory and page tables.
///
/// Entries are returned by value; there is no way to write through the window.
pub trait PageTableWindow {
    /// The page directory entry covering `va`.
    fn pde(&self, va: VirtualAddress) -> PageEntry;

    /// The page table entry for `va`; empty if no page table covers it.
    fn pte(&self, va: VirtualAddress) -> PageEntry;
}

/// Everything user code can see of its environment.
pub trait Environment: Syscalls + UserMemory + PageTableWindow {}

impl<T: Syscalls + UserMemory + PageTableWindow + ?Sized> Environment for T {}
