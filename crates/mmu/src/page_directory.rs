//! Two-level page directory.
//!
//! This module provides the `PageDirectory` type, which owns the page directory and the
//! page tables it points at, and provides mapping, unmapping and lookup operations.
//! Page tables live outside emulated physical memory, so directory entries carry only
//! flags and no frame number.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use crate::{
    FrameNumber, VirtualAddress,
    entry::PageEntry,
    flags::PageFlags,
    table::{ENTRY_COUNT, PageTable},
};

/// Errors reported by page directory updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No entry exists for the address.
    NotMapped,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMapped => f.write_str("no mapping for address"),
        }
    }
}

/// A resolved, present mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub frame: FrameNumber,
    pub flags: PageFlags,
}

/// Flags carried by every present directory entry. Access control happens at the
/// page table level.
const DIRECTORY_FLAGS: PageFlags = PageFlags::PRESENT
    .union(PageFlags::WRITABLE)
    .union(PageFlags::USER);

/// An address space's page directory and its page tables.
pub struct PageDirectory {
    tables: Box<[Option<PageTable>]>,
}

impl PageDirectory {
    /// Creates an empty page directory.
    pub fn new() -> Self {
        Self {
            tables: (0..ENTRY_COUNT).map(|_| None).collect(),
        }
    }

    /// Returns the directory entry covering `virt`.
    pub fn pde(&self, virt: VirtualAddress) -> PageEntry {
        match &self.tables[virt.directory_index()] {
            Some(_) => PageEntry::new(FrameNumber::new(0), DIRECTORY_FLAGS),
            None => PageEntry::default(),
        }
    }

    /// Returns the raw page table entry for `virt`, or an empty entry if no page table
    /// covers it.
    pub fn pte(&self, virt: VirtualAddress) -> PageEntry {
        self.table(virt)
            .map(|table| table.entry(virt.table_index()))
            .unwrap_or_default()
    }

    /// Resolves `virt` to its frame and flags, if the page is present.
    pub fn translate(&self, virt: VirtualAddress) -> Option<Mapping> {
        let entry = self.pte(virt);
        entry.frame().map(|frame| Mapping {
            frame,
            flags: entry.flags(),
        })
    }

    /// Maps the page at `virt` to `frame` with the given flags, allocating the page table
    /// if needed. The present bit is always set.
    ///
    /// Returns the frame previously held by the entry at `virt`, if any, even when that
    /// entry had its present bit cleared. Reference counting of both frames is the
    /// caller's business.
    ///
    /// # Panics
    /// Panics if the virtual address is not page-aligned.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Option<FrameNumber> {
        assert!(virt.is_page_aligned(), "virtual address must be page-aligned");

        let table = self.tables[virt.directory_index()].get_or_insert_with(PageTable::new);
        let entry = table.entry_mut(virt.table_index());
        let previous = entry.raw_frame();
        *entry = PageEntry::new(frame, flags | PageFlags::PRESENT);
        previous
    }

    /// Unmaps the page at `virt`, returning the frame the entry held, present or not.
    ///
    /// # Panics
    /// Panics if the virtual address is not page-aligned.
    pub fn unmap(&mut self, virt: VirtualAddress) -> Option<FrameNumber> {
        assert!(virt.is_page_aligned(), "virtual address must be page-aligned");

        let table = self.tables[virt.directory_index()].as_mut()?;
        let entry = table.entry_mut(virt.table_index());
        let frame = entry.raw_frame();
        entry.clear();
        frame
    }

    /// Rewrites the flags of an existing entry, keeping its frame, and returns the old
    /// flags. The entry must be non-zero; it does not have to be present.
    pub fn set_flags(
        &mut self,
        virt: VirtualAddress,
        flags: PageFlags,
    ) -> Result<PageFlags, MapError> {
        let table = self.tables[virt.directory_index()]
            .as_mut()
            .ok_or(MapError::NotMapped)?;
        let entry = table.entry_mut(virt.table_index());
        if entry.as_u32() == 0 {
            return Err(MapError::NotMapped);
        }
        let old = entry.flags();
        entry.set_flags(flags);
        Ok(old)
    }

    /// Iterates over every present mapping in ascending address order.
    pub fn mappings(&self) -> impl Iterator<Item = (VirtualAddress, Mapping)> + '_ {
        self.tables
            .iter()
            .enumerate()
            .filter_map(|(pdx, table)| table.as_ref().map(|table| (pdx, table)))
            .flat_map(|(pdx, table)| {
                table.present_entries().filter_map(move |(ptx, entry)| {
                    let virt = VirtualAddress::new(((pdx as u32) << 22) | ((ptx as u32) << 12));
                    entry.frame().map(|frame| {
                        (
                            virt,
                            Mapping {
                                frame,
                                flags: entry.flags(),
                            },
                        )
                    })
                })
            })
    }

    /// Removes every entry and returns the frames they held, including those of entries
    /// whose present bit was cleared.
    pub fn clear(&mut self) -> Vec<FrameNumber> {
        let mut frames = Vec::new();
        for table in self.tables.iter_mut().filter_map(Option::take) {
            frames.extend(table.used_entries().filter_map(|(_, entry)| entry.raw_frame()));
        }
        frames
    }

    fn table(&self, virt: VirtualAddress) -> Option<&PageTable> {
        self.tables[virt.directory_index()].as_ref()
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_single_page() {
        let mut dir = PageDirectory::new();
        let virt = VirtualAddress::new(0x0020_0000);

        assert_eq!(dir.map(virt, FrameNumber::new(3), PageFlags::USER_WRITE), None);

        let mapping = dir.translate(virt).expect("page should be mapped");
        assert_eq!(mapping.frame, FrameNumber::new(3));
        assert_eq!(mapping.flags, PageFlags::USER_WRITE);
        assert!(dir.pde(virt).is_present());
    }

    #[test]
    fn translate_ignores_page_offset() {
        let mut dir = PageDirectory::new();
        dir.map(VirtualAddress::new(0x1000), FrameNumber::new(8), PageFlags::USER_READ);
        assert_eq!(
            dir.translate(VirtualAddress::new(0x1abc)).map(|m| m.frame),
            Some(FrameNumber::new(8))
        );
    }

    #[test]
    fn remap_returns_previous_frame() {
        let mut dir = PageDirectory::new();
        let virt = VirtualAddress::new(0x5000);
        dir.map(virt, FrameNumber::new(1), PageFlags::USER_WRITE);
        assert_eq!(
            dir.map(virt, FrameNumber::new(2), PageFlags::USER_COW),
            Some(FrameNumber::new(1))
        );
    }

    #[test]
    fn unmap_mapped_page() {
        let mut dir = PageDirectory::new();
        let virt = VirtualAddress::new(0x1000);
        dir.map(virt, FrameNumber::new(4), PageFlags::USER_READ);
        assert_eq!(dir.unmap(virt), Some(FrameNumber::new(4)));
        assert_eq!(dir.translate(virt), None);
        assert!(!dir.pte(virt).is_present());
    }

    #[test]
    fn unmap_unmapped_page() {
        let mut dir = PageDirectory::new();
        assert_eq!(dir.unmap(VirtualAddress::new(0x1000)), None);
    }

    #[test]
    fn absent_directory_entry() {
        let dir = PageDirectory::new();
        let virt = VirtualAddress::new(0x0080_0000);
        assert!(!dir.pde(virt).is_present());
        assert!(!dir.pte(virt).is_present());
    }

    #[test]
    fn set_flags_requires_existing_entry() {
        let mut dir = PageDirectory::new();
        let virt = VirtualAddress::new(0x3000);
        assert_eq!(
            dir.set_flags(virt, PageFlags::USER_READ),
            Err(MapError::NotMapped)
        );

        dir.map(virt, FrameNumber::new(6), PageFlags::USER_WRITE);
        assert_eq!(
            dir.set_flags(virt, PageFlags::USER_READ),
            Ok(PageFlags::USER_WRITE)
        );
        assert_eq!(dir.translate(virt).map(|m| m.flags), Some(PageFlags::USER_READ));
    }

    #[test]
    fn mappings_are_listed_in_address_order() {
        let mut dir = PageDirectory::new();
        dir.map(VirtualAddress::new(0x0080_0000), FrameNumber::new(2), PageFlags::USER_READ);
        dir.map(VirtualAddress::new(0x1000), FrameNumber::new(1), PageFlags::USER_WRITE);
        dir.map(VirtualAddress::new(0xeebf_d000), FrameNumber::new(3), PageFlags::USER_WRITE);

        let addrs: Vec<_> = dir.mappings().map(|(virt, _)| virt.as_u32()).collect();
        assert_eq!(addrs, vec![0x1000, 0x0080_0000, 0xeebf_d000]);
    }

    #[test]
    fn clear_returns_all_frames() {
        let mut dir = PageDirectory::new();
        dir.map(VirtualAddress::new(0x1000), FrameNumber::new(1), PageFlags::USER_WRITE);
        dir.map(VirtualAddress::new(0x2000), FrameNumber::new(2), PageFlags::USER_WRITE);

        let mut frames = dir.clear();
        frames.sort();
        assert_eq!(frames, vec![FrameNumber::new(1), FrameNumber::new(2)]);
        assert_eq!(dir.mappings().count(), 0);
    }

    #[test]
    fn hidden_entries_still_give_back_their_frames() {
        let mut dir = PageDirectory::new();
        let a = VirtualAddress::new(0x1000);
        let b = VirtualAddress::new(0x2000);
        let c = VirtualAddress::new(0x3000);
        for (i, virt) in [a, b, c].into_iter().enumerate() {
            dir.map(virt, FrameNumber::new(i + 1), PageFlags::USER_WRITE);
            dir.set_flags(virt, PageFlags::USER | PageFlags::WRITABLE).unwrap();
            assert_eq!(dir.translate(virt), None);
        }

        assert_eq!(
            dir.map(a, FrameNumber::new(9), PageFlags::USER_READ),
            Some(FrameNumber::new(1))
        );
        assert_eq!(dir.unmap(b), Some(FrameNumber::new(2)));

        let mut frames = dir.clear();
        frames.sort();
        assert_eq!(frames, vec![FrameNumber::new(3), FrameNumber::new(9)]);
    }
}
