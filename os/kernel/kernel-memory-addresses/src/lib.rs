//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses handled by the bootstrap
//! memory manager.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A physical (RAM / MMIO) byte address. |
//! | [`VirtualAddress`] | A virtual (page-table translated) byte address. |
//! | [`PhysicalPage<S>`] | The aligned base of a physical page of size `S`. A `PhysicalPage<Size4K>` is a **frame**. |
//!
//! Page sizes are type-level markers implementing [`PageSize`]:
//!
//! - [`Size4K`] - 4 KiB frames, the allocation granularity
//! - [`Size1G`] - 1 GiB, the span of one page-directory-pointer entry
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0012_3456);
//! let frame = pa.page::<Size4K>();
//! assert_eq!(frame.base().as_u64(), 0x0012_3000);
//! assert_eq!(frame.index(), 0x123);
//!
//! let va = VirtualAddress::from_table_indices(511, 509, 3, 7);
//! assert_eq!(va.l4_index(), 511);
//! assert_eq!(va.l3_index(), 509);
//! assert_eq!(va.l2_index(), 3);
//! assert_eq!(va.l1_index(), 7);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` over `u64` and implement `Copy`,
//!   `Eq`, `Ord` and `Hash`.
//! - All alignment helpers are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;

pub use crate::page_size::{PageSize, Size1G, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
pub use crate::virtual_address::VirtualAddress;

/// Number of index bits consumed by each paging level.
pub const TABLE_INDEX_BITS: u32 = 9;

/// Mask for a single paging-level index (`0..512`).
pub const TABLE_INDEX_MASK: u64 = (1 << TABLE_INDEX_BITS) - 1;

/// Align `x` down to a multiple of `a` (power of two).
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to a multiple of `a` (power of two).
///
/// Returns `None` if the aligned value does not fit in a `u64`.
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> Option<u64> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_down(4095, 4096), 0);
        assert_eq!(align_down(8193, 4096), 8192);
        assert_eq!(align_up(0, 4096), Some(0));
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(u64::MAX, 4096), None);
    }

    #[test]
    fn frame_index_round_trip() {
        let frame = PhysicalPage::<Size4K>::from_index(0x42);
        assert_eq!(frame.base().as_u64(), 0x42_000);
        assert_eq!(frame.index(), 0x42);
        assert_eq!(PhysicalAddress::new(0x42_fff).page::<Size4K>(), frame);
    }

    #[test]
    fn virtual_indices_are_canonical() {
        let va = VirtualAddress::from_table_indices(511, 509, 0, 0);
        assert_eq!(va.as_u64(), 0xFFFF_FFFF_4000_0000);
        assert!(va.is_aligned::<Size1G>());

        let low = VirtualAddress::from_table_indices(1, 2, 3, 4);
        assert_eq!(low.as_u64() >> 47, 0);
        assert_eq!(
            (low.l4_index(), low.l3_index(), low.l2_index(), low.l1_index()),
            (1, 2, 3, 4)
        );
    }
}
