//! Environment startup and exit.

use mmu::{PageFlags, layout::ULIB_DATA};

use crate::{
    error::Error,
    syscall::{EnvId, Environment},
    this_env,
};

/// Prepares a freshly started environment for user code: maps the library data page
/// and fills in the identity slot.
pub fn libmain(env: &dyn Environment) -> Result<(), Error> {
    env.alloc_page(EnvId::SELF, ULIB_DATA, PageFlags::USER_WRITE)?;
    this_env::refresh(env)?;
    log::trace!("[{}] library initialized", env.current_context_id());
    Ok(())
}

/// Destroys the calling environment.
pub fn exit(env: &dyn Environment) {
    if let Err(err) = env.destroy(EnvId::SELF) {
        log::error!("[{}] exit: {}", env.current_context_id(), err);
    }
}
