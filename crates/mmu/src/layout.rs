//! User address space layout.
//!
//! ```text
//!  UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                      |     User exception stack     |
//!                      +------------------------------+ 0xeebff000
//!                      |        Empty guard page      |
//!        USTACKTOP  -> +------------------------------+ 0xeebfe000
//!                      |      Normal user stack       |
//!                      +------------------------------+ 0xeebfd000
//!                      |             ...              |
//!        ULIB_DATA  -> +------------------------------+ 0x00a00000
//!                      |    User library data page    |
//!                      +------------------------------+
//!                      |             ...              |
//!            UTEXT  -> +------------------------------+ 0x00800000
//!           PFTEMP  -> |  Fault handler scratch page  | 0x007ff000
//!                      |             ...              |
//!            UTEMP  -> +------------------------------+ 0x00400000
//!                      |             ...              |
//!                    0 +------------------------------+
//! ```

use crate::{PAGE_SIZE, VirtualAddress};

/// Bytes of address space covered by one page table.
pub const PT_SPAN: u32 = 4 * 1024 * 1024;

const PAGE: u32 = PAGE_SIZE as u32;

/// Top of user-accessible address space.
pub const UTOP: VirtualAddress = VirtualAddress::new(0xeec0_0000);

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: VirtualAddress = UTOP;

/// Base of the user exception stack page.
pub const UXSTACK: VirtualAddress = VirtualAddress::new(UXSTACKTOP.as_u32() - PAGE);

/// Top of the normal user stack; one guard page separates it from the exception stack.
pub const USTACKTOP: VirtualAddress = VirtualAddress::new(UTOP.as_u32() - 2 * PAGE);

/// Base of the initial user stack page.
pub const USTACK: VirtualAddress = VirtualAddress::new(USTACKTOP.as_u32() - PAGE);

/// Where user programs start.
pub const UTEXT: VirtualAddress = VirtualAddress::new(2 * PT_SPAN);

/// Temporary mapping area for user code.
pub const UTEMP: VirtualAddress = VirtualAddress::new(PT_SPAN);

/// Scratch page used by the page fault handler while it copies a page.
pub const PFTEMP: VirtualAddress = VirtualAddress::new(UTEMP.as_u32() + PT_SPAN - PAGE);

/// User library data page; holds the environment identity slot.
pub const ULIB_DATA: VirtualAddress = VirtualAddress::new(0x00a0_0000);

/// Returns true if the whole range `[addr, addr + len)` lies below `UTOP`.
pub fn is_user_range(addr: VirtualAddress, len: usize) -> bool {
    (addr.as_usize())
        .checked_add(len)
        .is_some_and(|end| end <= UTOP.as_usize())
}
