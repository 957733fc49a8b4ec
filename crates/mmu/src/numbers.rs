//! Page and frame number types.
//!
//! A page number identifies a 4 KiB slot of virtual address space; a frame number
//! identifies a 4 KiB slot of emulated physical memory.

use crate::{
    PAGE_SHIFT,
    address::{PhysicalAddress, VirtualAddress},
};
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Macro to define common page/frame number functionality.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned physical addresses."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 << PAGE_SHIFT) as u32)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        addr.frame_number()
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Page numbers are zero-indexed and correspond to PAGE_SIZE-aligned virtual addresses."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new((self.0 << PAGE_SHIFT) as u32)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        addr.page_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;

    #[test]
    fn frame_start_address() {
        let frame = FrameNumber::new(1);
        assert_eq!(frame.start().as_usize(), PAGE_SIZE);
    }

    #[test]
    fn page_start_address() {
        let page = PageNumber::new(0x200);
        assert_eq!(page.start(), VirtualAddress::new(0x0020_0000));
    }

    #[test]
    fn page_from_unaligned_virtual_address() {
        let addr = VirtualAddress::new(PAGE_SIZE as u32 * 3 + 10);
        assert_eq!(PageNumber::from(addr).as_usize(), 3);
    }

    #[test]
    fn page_arithmetic() {
        let page = PageNumber::new(10);
        assert_eq!((page + 5).as_usize(), 15);
        assert_eq!(PageNumber::new(10) - PageNumber::new(3), 7);
    }

    #[test]
    fn ordering() {
        assert!(FrameNumber::new(5) < FrameNumber::new(10));
        assert_eq!(FrameNumber::new(5), FrameNumber::new(5));
    }
}
