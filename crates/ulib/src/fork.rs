//! Copy-on-write fork.
//!
//! The parent shares every mapped page below `USTACKTOP` with the child. Writable pages
//! become copy-on-write on both sides, and the first write on either side faults into
//! [`pgfault`], which gives the writer a private copy. Read-only pages are shared as is.

use alloc::{boxed::Box, vec};

use mmu::{
    PAGE_SIZE, PageFlags, PageNumber, VirtualAddress,
    layout::{PFTEMP, USTACKTOP, UXSTACK},
};

use crate::{
    error::{FaultError, ForkError, SysError},
    pgfault::set_pgfault_handler,
    syscall::{EnvId, EnvStatus, Environment},
    this_env,
    trap::UTrapframe,
    view::AddressSpaceView,
};

/// Page fault upcall: gives the faulting environment a private, writable copy of a
/// copy-on-write page.
///
/// Only a write to a present copy-on-write page is handled. Anything else is a bug
/// elsewhere and is reported as an error, which the kernel treats as fatal.
pub fn pgfault(env: &dyn Environment, utf: &UTrapframe) -> Result<(), FaultError> {
    let page = utf.fault_va.align_down(PAGE_SIZE);

    if !utf.is_write() {
        return Err(FaultError::NotWrite { va: utf.fault_va });
    }
    if !AddressSpaceView::new(env).is_cow(page) {
        return Err(FaultError::NotCow { va: utf.fault_va });
    }

    env.alloc_page(EnvId::SELF, PFTEMP, PageFlags::USER_WRITE)?;

    let mut contents = vec![0u8; PAGE_SIZE];
    env.read(page, &mut contents)?;
    env.write(PFTEMP, &contents)?;

    env.map_page(EnvId::SELF, PFTEMP, EnvId::SELF, page, PageFlags::USER_WRITE)?;
    env.unmap_page(EnvId::SELF, PFTEMP)?;

    log::trace!("copied copy-on-write page {} after fault at {}", page, utf.fault_va);
    Ok(())
}

/// Shares the caller's page `pn` with `child` at the same address.
///
/// Writable and copy-on-write pages are mapped copy-on-write into the child first, then
/// re-mapped copy-on-write in the caller; the caller's entry is re-tagged even when it
/// already was copy-on-write. Read-only pages are shared read-only.
pub fn duppage(env: &dyn Environment, child: EnvId, pn: PageNumber) -> Result<(), ForkError> {
    let va = pn.start();
    let fail = |err: SysError| ForkError::Duplicate { va, err };

    let flags = AddressSpaceView::new(env)
        .flags(va)
        .ok_or(ForkError::Duplicate {
            va,
            err: SysError::Invalid,
        })?;

    if flags.needs_cow_share() {
        env.map_page(EnvId::SELF, va, child, va, PageFlags::USER_COW)
            .map_err(fail)?;
        env.map_page(EnvId::SELF, va, EnvId::SELF, va, PageFlags::USER_COW)
            .map_err(fail)?;
    } else {
        env.map_page(EnvId::SELF, va, child, va, PageFlags::USER_READ)
            .map_err(fail)?;
    }
    Ok(())
}

/// Creates a copy-on-write child of the caller.
///
/// Returns the child's id. `child_main` runs inside the child once the kernel schedules
/// it, after [`fork_child_continuation`] has fixed up the child's identity.
pub fn fork<F>(env: &dyn Environment, child_main: F) -> Result<EnvId, ForkError>
where
    F: FnOnce(&dyn Environment) + 'static,
{
    // The handler must be registered before the child exists: the child's first write
    // already lands on a copy-on-write page.
    set_pgfault_handler(env, pgfault).map_err(ForkError::Handler)?;

    let child = env
        .create_context(Box::new(move |env: &dyn Environment| {
            match fork_child_continuation(env) {
                Ok(_) => child_main(env),
                Err(err) => log::error!("[{}] {}", env.current_context_id(), err),
            }
        }))
        .map_err(ForkError::Create)?;

    fork_parent_continuation(env, child)
}

/// The child's side of fork. Returns the [`EnvId::SELF`] sentinel.
///
/// The identity slot still holds the parent's id; it is the only thing the child fixes
/// itself. Everything else was set up by the parent before the child became runnable.
pub fn fork_child_continuation(env: &dyn Environment) -> Result<EnvId, ForkError> {
    this_env::refresh(env).map_err(ForkError::Identity)?;
    log::debug!("[{}] fork returned in child", env.current_context_id());
    Ok(EnvId::SELF)
}

/// The parent's side of fork: shares the address space, gives the child its own
/// exception stack and upcall, and marks it runnable. Returns the child's id.
pub fn fork_parent_continuation(env: &dyn Environment, child: EnvId) -> Result<EnvId, ForkError> {
    let view = AddressSpaceView::new(env);

    let mut shared = 0usize;
    for page in view.mapped_pages(VirtualAddress::new(0)..USTACKTOP) {
        duppage(env, child, page)?;
        shared += 1;
    }

    env.alloc_page(child, UXSTACK, PageFlags::USER_WRITE)
        .map_err(ForkError::ExceptionStack)?;
    env.set_fault_upcall(child, pgfault)
        .map_err(ForkError::Upcall)?;
    env.set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::Status)?;

    log::debug!(
        "[{}] forked {} sharing {} pages",
        env.current_context_id(),
        child,
        shared
    );
    Ok(child)
}
