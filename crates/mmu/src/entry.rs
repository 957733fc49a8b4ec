//! Page table entry for the emulated 32-bit paging unit.

use core::fmt;

use crate::{FrameNumber, PAGE_SHIFT, PhysicalAddress, flags::PageFlags};

/// A single page table (or page directory) entry.
///
/// Same layout as a 32-bit x86 entry:
/// - Bits 0-11: Flags (see [`PageFlags`]; bits 9-11 are available to software)
/// - Bits 12-31: Frame number
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Frame number mask (bits 12-31).
    const FRAME_MASK: u32 = 0xFFFF_F000;

    /// Flag bits mask (bits 0-11).
    const FLAGS_MASK: u32 = 0x0000_0FFF;

    /// Creates a new entry mapping `frame` with `flags`.
    pub const fn new(frame: FrameNumber, flags: PageFlags) -> Self {
        let frame_bits = ((frame.as_usize() as u32) << PAGE_SHIFT) & Self::FRAME_MASK;
        Self(frame_bits | (flags.bits() & Self::FLAGS_MASK))
    }

    /// Returns the frame stored in this entry, or `None` if the entry is not present.
    pub fn frame(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new((self.0 >> PAGE_SHIFT) as usize))
        } else {
            None
        }
    }

    /// Returns the frame number stored in this entry even when the present bit is clear.
    /// Frame 0 is never handed out, so a zero frame field means no frame.
    pub fn raw_frame(self) -> Option<FrameNumber> {
        let number = self.0 >> PAGE_SHIFT;
        (number != 0).then(|| FrameNumber::new(number as usize))
    }

    /// Returns the physical address of the mapped frame, if present.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.frame().map(FrameNumber::start)
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the frame.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::FRAME_MASK) | (flags.bits() & Self::FLAGS_MASK);
    }

    /// Returns whether this entry is present.
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw value of this entry.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Creates an entry from a raw value.
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("frame", &format_args!("{:#x}", self.0 >> PAGE_SHIFT))
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_frame_and_flags() {
        let entry = PageEntry::new(FrameNumber::new(0x1234), PageFlags::USER_COW);
        assert_eq!(entry.as_u32(), 0x0123_4805);
        assert_eq!(entry.frame(), Some(FrameNumber::new(0x1234)));
        assert_eq!(entry.flags(), PageFlags::USER_COW);
    }

    #[test]
    fn absent_entry_has_no_frame() {
        let entry = PageEntry::new(FrameNumber::new(7), PageFlags::USER);
        assert!(!entry.is_present());
        assert_eq!(entry.frame(), None);
        assert_eq!(PageEntry::default().address(), None);
    }

    #[test]
    fn raw_frame_ignores_present_bit() {
        let entry = PageEntry::new(FrameNumber::new(7), PageFlags::USER);
        assert_eq!(entry.raw_frame(), Some(FrameNumber::new(7)));
        assert_eq!(PageEntry::new(FrameNumber::new(0), PageFlags::USER).raw_frame(), None);
        assert_eq!(PageEntry::default().raw_frame(), None);
    }

    #[test]
    fn set_flags_keeps_frame() {
        let mut entry = PageEntry::new(FrameNumber::new(9), PageFlags::USER_WRITE);
        entry.set_flags(PageFlags::USER_COW);
        assert_eq!(entry.frame(), Some(FrameNumber::new(9)));
        assert!(entry.flags().is_cow());
        assert!(!entry.flags().is_writable());
    }
}
