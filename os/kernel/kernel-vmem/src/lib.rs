//! # Page-Table Primitives
//!
//! Minimal x86-64 paging building blocks for the bootstrap memory manager.
//!
//! ## What you get
//! - A bit-exact [`PageEntryBits`] / [`PageTableEntry`] and a 4 KiB-aligned
//!   [`PageTable`] of 512 entries.
//! - A [`PageTableCursor`] that appends entries to a table front to back.
//! - The two seams the allocators are built around: [`FrameAlloc`] (where
//!   frames come from) and [`PhysMapper`] (how physical memory is touched).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! Each level is a table of 512 (2⁹) entries of 8 bytes. A **PD** entry links
//! to a **PT**, and a **PT** entry maps one 4 KiB frame. One PDPT entry thus
//! spans 512 × 512 × 4 KiB = 1 GiB.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod cursor;
mod page_entry_bits;
mod page_table;

pub use crate::cursor::{PageTableCursor, TableFull};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageTable, PageTableEntry, TableIndex};
pub use kernel_memory_addresses as addresses;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of **physical** 4 KiB frames.
///
/// Returned frames are 4 KiB aligned by construction. `None` means
/// out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, frame: PhysicalPage<Size4K>);
}

/// Converts physical addresses to usable references in the current virtual
/// address space (identity map, or a fixed-offset physical window).
///
/// # Safety
/// - `pa` must be mapped writable in the current page tables for `&mut T`.
/// - The lifetime `'a` is chosen by the caller; the mapping must stay valid
///   for `'a` and no other reference to the same memory may be live.
/// - `T` must match the bytes at `pa`.
pub trait PhysMapper {
    /// Convert a physical address to a mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Convert a physical address to a mutable slice of `len` elements.
    ///
    /// # Safety
    /// See the trait documentation; the whole `len * size_of::<T>()` byte
    /// range must be mapped contiguously.
    unsafe fn phys_to_mut_slice<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        let first: *mut T = unsafe { self.phys_to_mut::<T>(pa) };
        unsafe { core::slice::from_raw_parts_mut(first, len) }
    }
}

/// Reach the page table stored in `frame`.
///
/// # Safety
/// - `frame` must hold a page table (or be about to be initialized as one).
/// - No other live reference to that frame may exist for `'a`.
#[inline]
pub unsafe fn table_mut<'a, M: PhysMapper>(
    m: &M,
    frame: PhysicalPage<Size4K>,
) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(frame.base()) }
}
