//! Installing the caller's page fault upcall.

use mmu::{PageFlags, layout::UXSTACK};

use crate::{
    error::SysError,
    syscall::{EnvId, Environment},
    trap::UpcallEntry,
    view::AddressSpaceView,
};

/// Registers `handler` as the caller's page fault upcall.
///
/// The first call also gives the caller its exception stack: a private, writable page
/// just below `UXSTACKTOP` that is never shared with another environment.
pub fn set_pgfault_handler(env: &dyn Environment, handler: UpcallEntry) -> Result<(), SysError> {
    if !AddressSpaceView::new(env).is_mapped(UXSTACK) {
        env.alloc_page(EnvId::SELF, UXSTACK, PageFlags::USER_WRITE)?;
        log::debug!("allocated exception stack at {}", UXSTACK);
    }
    env.set_fault_handler(handler)
}
