//! The environment identity slot.
//!
//! The first word of the user library data page holds the id of the environment it
//! belongs to. A forked child inherits the page copy-on-write, so the slot still names
//! the parent until the child refreshes it.

use mmu::layout::ULIB_DATA;

use crate::{
    error::MemoryError,
    syscall::{EnvId, Environment},
    view::AddressSpaceView,
};

/// Writes the caller's id into the identity slot.
///
/// Does nothing if the library data page is not mapped.
pub fn refresh(env: &dyn Environment) -> Result<(), MemoryError> {
    if !AddressSpaceView::new(env).is_mapped(ULIB_DATA) {
        return Ok(());
    }
    let id = env.current_context_id();
    env.write(ULIB_DATA, &id.as_u32().to_le_bytes())
}

/// Reads the identity slot, or `None` if the library data page is not mapped.
pub fn get(env: &dyn Environment) -> Result<Option<EnvId>, MemoryError> {
    if !AddressSpaceView::new(env).is_mapped(ULIB_DATA) {
        return Ok(None);
    }
    let mut word = [0u8; 4];
    env.read(ULIB_DATA, &mut word)?;
    Ok(Some(EnvId::new(u32::from_le_bytes(word))))
}
