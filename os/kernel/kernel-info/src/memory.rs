//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size1G, Size4K, VirtualAddress};

/// Size of a physical frame in bytes.
pub const FRAME_SIZE: u64 = Size4K::SIZE;

/// log2 of [`FRAME_SIZE`].
pub const FRAME_SHIFT: u32 = Size4K::SHIFT;

/// Largest block order (log2 of the frame count) the frame allocator hands out.
///
/// Availability codes are clipped at `MAX_PAGE_ORDER + 1`, which must fit the
/// 4-bit codes used above tree level 1.
pub const MAX_PAGE_ORDER: u8 = 10;

/// Number of 64-bit entries in one page table.
pub const PAGE_TABLE_ENTRIES: usize = 512;

/// Base of the physical window: physical address `pa` is reachable at
/// `PHYS_WINDOW_BASE + pa`.
pub const PHYS_WINDOW_BASE: u64 = 0xffff_8880_0000_0000;

/// Start of the virtual region served by the single-page allocator.
///
/// One PDPT slot (PML4 slot 511, PDPT slot 509) just below the kernel image.
pub const PAGE_ALLOC_BASE: u64 = VirtualAddress::from_table_indices(511, 509, 0, 0).as_u64();

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

const _: () = {
    assert!(MAX_PAGE_ORDER < 15);
    assert!(FRAME_SIZE == 1 << FRAME_SHIFT);
    assert!(PAGE_TABLE_ENTRIES * 8 == FRAME_SIZE as usize);
    assert!(PAGE_ALLOC_BASE.is_multiple_of(Size1G::SIZE));
    assert!(PAGE_ALLOC_BASE + Size1G::SIZE <= KERNEL_BASE);
    assert!(KERNEL_BASE > PHYS_WINDOW_BASE);
};
