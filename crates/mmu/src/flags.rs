//! Page table entry permission flags.

use bitflags::bitflags;

bitflags! {
    /// Permission and state bits of a page table entry.
    ///
    /// The hardware bits sit at their x86 positions. `COPY_ON_WRITE` uses one of the
    /// bits the paging hardware leaves to software, so it never grants access by itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u32 {
        /// The entry maps a frame.
        const PRESENT       = 1 << 0;
        /// Writes through this entry are allowed.
        const WRITABLE      = 1 << 1;
        /// User mode may access this entry.
        const USER          = 1 << 2;
        /// Shared frame; the first write must fault and privatize the page.
        const COPY_ON_WRITE = 1 << 11;
    }
}

impl PageFlags {
    /// Bits a user environment may pass to the mapping syscalls.
    pub const SYSCALL_ALLOWED: Self = Self::PRESENT
        .union(Self::WRITABLE)
        .union(Self::USER)
        .union(Self::COPY_ON_WRITE);

    /// Bits every user mapping must carry.
    pub const USER_REQUIRED: Self = Self::PRESENT.union(Self::USER);

    /// A present, user-accessible, read-only mapping.
    pub const USER_READ: Self = Self::USER_REQUIRED;

    /// A present, user-accessible, writable mapping.
    pub const USER_WRITE: Self = Self::USER_REQUIRED.union(Self::WRITABLE);

    /// A present, user-accessible, copy-on-write mapping.
    pub const USER_COW: Self = Self::USER_REQUIRED.union(Self::COPY_ON_WRITE);

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Returns whether the copy-on-write tag is set.
    pub fn is_cow(self) -> bool {
        self.contains(Self::COPY_ON_WRITE)
    }

    /// Returns true if a write through an entry with these flags must be shared lazily,
    /// that is the entry is either writable or already copy-on-write.
    pub fn needs_cow_share(self) -> bool {
        self.intersects(Self::WRITABLE | Self::COPY_ON_WRITE)
    }

    /// A copy-on-write entry must never be hardware-writable.
    pub fn is_consistent(self) -> bool {
        !self.contains(Self::WRITABLE | Self::COPY_ON_WRITE)
    }
}
