//! Read-only view of the caller's address space.
//!
//! Permission bits change only through the mapping syscalls. The view hands out entries
//! by value, so a user environment can inspect its mappings but never grant itself
//! access by editing them.

use core::ops::Range;

use mmu::{PAGE_SIZE, PageEntry, PageFlags, PageNumber, VirtualAddress, layout::PT_SPAN};

use crate::syscall::PageTableWindow;

/// Presence and permission queries over the caller's page tables.
pub struct AddressSpaceView<'a, W: ?Sized + PageTableWindow> {
    window: &'a W,
}

impl<'a, W: ?Sized + PageTableWindow> AddressSpaceView<'a, W> {
    pub fn new(window: &'a W) -> Self {
        Self { window }
    }

    /// Whether a page table covers `va`.
    pub fn has_table(&self, va: VirtualAddress) -> bool {
        self.window.pde(va).is_present()
    }

    /// The page table entry for `va`, or `None` unless both levels are present.
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntry> {
        if !self.has_table(va) {
            return None;
        }
        let entry = self.window.pte(va);
        entry.is_present().then_some(entry)
    }

    /// Whether the page containing `va` is mapped.
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.entry(va).is_some()
    }

    /// Flags of the page containing `va`, if mapped.
    pub fn flags(&self, va: VirtualAddress) -> Option<PageFlags> {
        self.entry(va).map(PageEntry::flags)
    }

    /// Whether the page containing `va` is mapped and tagged copy-on-write.
    pub fn is_cow(&self, va: VirtualAddress) -> bool {
        self.flags(va).is_some_and(PageFlags::is_cow)
    }

    /// Whether the page containing `va` is mapped writable.
    pub fn is_writable(&self, va: VirtualAddress) -> bool {
        self.flags(va).is_some_and(PageFlags::is_writable)
    }

    /// Iterates over the mapped pages in `range`, skipping whole page tables that are
    /// absent.
    pub fn mapped_pages(&self, range: Range<VirtualAddress>) -> MappedPages<'a, W> {
        MappedPages {
            window: self.window,
            next: Some(range.start.align_down(PAGE_SIZE)),
            end: range.end,
        }
    }
}

/// Iterator returned by [`AddressSpaceView::mapped_pages`].
pub struct MappedPages<'a, W: ?Sized + PageTableWindow> {
    window: &'a W,
    next: Option<VirtualAddress>,
    end: VirtualAddress,
}

impl<W: ?Sized + PageTableWindow> Iterator for MappedPages<'_, W> {
    type Item = PageNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(va) = self.next.filter(|va| *va < self.end) {
            if !self.window.pde(va).is_present() {
                let table_end = va.align_down(PT_SPAN as usize).checked_add(PT_SPAN);
                self.next = table_end;
                continue;
            }

            self.next = va.checked_add(PAGE_SIZE as u32);
            if self.window.pte(va).is_present() {
                return Some(va.page_number());
            }
        }
        None
    }
}
