//! # Exofork kernel
//!
//! A software-emulated exokernel hosting environments that fork with copy-on-write.
//! Physical memory, page tables and the MMU are emulated in process; environments are
//! Rust closures that reach the kernel only through [`ulib::Environment`].
//!
//! - [`Kernel`]: environment table, scheduler, syscalls and page fault delivery.
//! - [`monitor`]: the interactive diagnostic shell.
//! - [`unwind`]: frame-pointer stack walking over environment memory.

mod config;
mod console;
pub mod demo;
mod env;
mod kernel;
pub mod monitor;
mod syscall;
mod trap;
pub mod unwind;

pub use config::KernelConfig;
pub use console::{Console, ConsoleWriter};
pub use env::MAX_ENV_SLOTS;
pub use kernel::Kernel;
pub use monitor::{Command, Monitor, MonitorContext};
pub use syscall::UserContext;
