//! The built-in copy-on-write demonstration.
//!
//! The root environment writes `AAAA` to a private page and forks. The child
//! overwrites the page with `BBBB`; the parent's copy still reads `AAAA` afterwards.

use core::fmt;

use mmu::{PageFlags, VirtualAddress};
use ulib::{EnvId, Environment, Error, ForkError, MemoryError, SysError};

use crate::kernel::Kernel;

/// Page both environments write to.
pub const DEMO_VA: VirtualAddress = VirtualAddress::new(0x0020_0000);

pub const PARENT_DATA: &[u8; 4] = b"AAAA";
pub const CHILD_DATA: &[u8; 4] = b"BBBB";

#[derive(Debug)]
enum DemoError {
    Lib(Error),
    Fork(ForkError),
}

impl fmt::Display for DemoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lib(err) => fmt::Display::fmt(err, f),
            Self::Fork(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<Error> for DemoError {
    fn from(err: Error) -> Self {
        Self::Lib(err)
    }
}

impl From<SysError> for DemoError {
    fn from(err: SysError) -> Self {
        Self::Lib(err.into())
    }
}

impl From<MemoryError> for DemoError {
    fn from(err: MemoryError) -> Self {
        Self::Lib(err.into())
    }
}

/// Spawns the demonstration's root environment. Returns its id.
pub fn spawn(kernel: &Kernel) -> Result<EnvId, SysError> {
    kernel.spawn(|env: &dyn Environment| {
        if let Err(err) = parent_main(env) {
            log::error!("[{}] demo: {}", env.current_context_id(), err);
            ulib::exit(env);
        }
    })
}

fn parent_main(env: &dyn Environment) -> Result<(), DemoError> {
    ulib::libmain(env)?;
    env.alloc_page(EnvId::SELF, DEMO_VA, PageFlags::USER_WRITE)?;
    env.write(DEMO_VA, PARENT_DATA)?;

    let child = ulib::fork(env, |env: &dyn Environment| {
        if let Err(err) = child_main(env) {
            log::error!("[{}] demo: {}", env.current_context_id(), err);
            ulib::exit(env);
        }
    })
    .map_err(DemoError::Fork)?;

    report(env, &format!("parent of {}", child))
}

fn child_main(env: &dyn Environment) -> Result<(), DemoError> {
    env.write(DEMO_VA, CHILD_DATA)?;
    report(env, "child")
}

fn report(env: &dyn Environment, who: &str) -> Result<(), DemoError> {
    let mut data = [0u8; 4];
    env.read(DEMO_VA, &mut data)?;
    env.cputs(&format!(
        "[{}] {} reads {} at {}\n",
        env.current_context_id(),
        who,
        String::from_utf8_lossy(&data),
        DEMO_VA
    ));
    Ok(())
}
