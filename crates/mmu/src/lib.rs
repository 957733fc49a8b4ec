#![cfg_attr(not(test), no_std)]

//! # Exofork MMU
//!
//! Software model of a 32-bit, two-level paging unit. It provides:
//!
//! - Physical and virtual address newtypes, page and frame numbers.
//! - Page table entries carrying a small tagged permission set, including the
//!   software-defined copy-on-write tag.
//! - Two-level page directories with on-demand page table allocation.
//! - Reference-counted physical frames backed by a host buffer.
//! - The fixed user address space layout shared by the kernel and user library.

extern crate alloc;

mod address;
mod entry;
mod flags;
mod frame;
pub mod layout;
mod numbers;
mod page_directory;
mod physical_memory;
mod table;

pub use address::{PhysicalAddress, VirtualAddress};
pub use entry::PageEntry;
pub use flags::PageFlags;
pub use frame::{Frame, FrameFlags};
pub use numbers::{FrameNumber, PageNumber};
pub use page_directory::{MapError, Mapping, PageDirectory};
pub use physical_memory::{AllocError, PhysicalMemory};
pub use table::{ENTRY_COUNT, PageTable};

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of low address bits that select a byte within a page.
pub const PAGE_SHIFT: u32 = 12;
