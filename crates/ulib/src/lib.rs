#![cfg_attr(not(test), no_std)]

//! # Exofork user library
//!
//! Code that runs inside an environment and talks to the kernel only through the
//! [`Syscalls`] interface:
//!
//! - [`AddressSpaceView`], a read-only window over the environment's own page tables.
//! - [`fork`], a copy-on-write fork built from the page mapping syscalls, with the
//!   [`pgfault`] upcall that privatizes a shared page on its first write.
//! - Environment startup ([`libmain`]) and the identity slot in [`this_env`].

extern crate alloc;

mod entry;
mod error;
mod fork;
mod pgfault;
mod syscall;
pub mod this_env;
mod trap;
mod view;

pub use entry::{exit, libmain};
pub use error::{Error, FaultError, ForkError, MemoryError, SysError};
pub use fork::{duppage, fork, fork_child_continuation, fork_parent_continuation, pgfault};
pub use pgfault::set_pgfault_handler;
pub use syscall::{
    ChildEntry, EnvId, EnvStatus, Environment, PageTableWindow, Syscalls, UserMemory,
};
pub use trap::{FaultCode, Trapframe, UTrapframe, UpcallEntry};
pub use view::{AddressSpaceView, MappedPages};

#[cfg(test)]
mod testing;
