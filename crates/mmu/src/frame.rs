use bitflags::bitflags;

use crate::AllocError;

/// Holds metadata for a physical memory frame.
///
/// Modeled after Linux's `struct page`: the allocation state plus the number of page
/// table entries that currently map the frame.
#[derive(Debug, Default)]
pub struct Frame {
    /// Flags identifying the state of this frame.
    pub flags: FrameFlags,
    /// Number of mappings referring to this frame.
    refs: u16,
}

impl Frame {
    /// Creates metadata for a reserved frame that is never handed out.
    pub const fn reserved() -> Self {
        Self {
            flags: FrameFlags::RESERVED,
            refs: 0,
        }
    }

    /// Returns the number of mappings referring to this frame.
    pub fn refs(&self) -> u16 {
        self.refs
    }

    /// Records one more mapping of this frame and returns the new count.
    ///
    /// Fails with [`AllocError::TooManyReferences`] once the count is saturated; the
    /// count is left unchanged.
    pub fn get(&mut self) -> Result<u16, AllocError> {
        self.refs = self
            .refs
            .checked_add(1)
            .ok_or(AllocError::TooManyReferences)?;
        Ok(self.refs)
    }

    /// Drops one mapping of this frame and returns the remaining count.
    ///
    /// # Panics
    /// Panics if the frame had no references.
    pub fn put(&mut self) -> u16 {
        assert!(self.refs > 0, "frame reference count underflow");
        self.refs -= 1;
        self.refs
    }

    /// Returns whether the frame is currently handed out.
    pub fn is_allocated(&self) -> bool {
        self.flags.contains(FrameFlags::ALLOCATED)
    }

    /// Returns whether the frame must never be allocated.
    pub fn is_reserved(&self) -> bool {
        self.flags.contains(FrameFlags::RESERVED)
    }
}

bitflags! {
    /// State flags for a physical memory frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Frame is allocated.
        const ALLOCATED = 1 << 0;
        /// Frame is reserved and should not be allocated.
        const RESERVED  = 1 << 1;
    }
}
