//! # Page Tables
//!
//! - [`TableIndex`]: a slot number in `0..512`.
//! - [`PageTableEntry`]: one 64-bit entry; either a 4 KiB leaf or a link to
//!   the next-level table. The bootstrap allocators never create huge pages.
//! - [`PageTable`]: 512 entries, 4 KiB aligned, exactly one frame.

use crate::PageEntryBits;
use kernel_info::memory::PAGE_TABLE_ENTRIES;
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// Index into a page table at any level.
///
/// Range is `0..512` (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PAGE_TABLE_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A single page-table entry.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageTableEntry(PageEntryBits);

impl PageTableEntry {
    /// Non-present entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Present + writable entry pointing at `frame`.
    ///
    /// Used both for 4 KiB leaves and for links to a next-level table.
    #[inline]
    #[must_use]
    pub const fn present_writable(frame: PhysicalPage<Size4K>) -> Self {
        Self(PageEntryBits::present_writable(frame))
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// The referenced frame, if present.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Option<PhysicalPage<Size4K>> {
        if self.is_present() {
            Some(PhysicalPage::from_addr(self.0.physical_address()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0.into_bits()
    }

    /// No validation is performed.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u64) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

/// A page table: 512 entries, 4 KiB aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    /// A fully non-present table.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::zero(); PAGE_TABLE_ENTRIES],
        }
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    /// Plain store; the caller handles TLB maintenance when changing live mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Number of present entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_present()).count()
    }
}

const _: () = assert!(size_of::<PageTable>() == 4096);
