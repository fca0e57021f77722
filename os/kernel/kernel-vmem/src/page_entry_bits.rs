use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 64-bit x86-64 page-table entry in its raw bitfield form.
///
/// Covers the common superset of fields at every paging level. The bootstrap
/// allocators only ever produce **present + writable** entries pointing at a
/// 4 KiB frame (either a leaf page or the next-level table).
///
/// ### Bit layout
///
/// | Bits      | Name              | Meaning |
/// |-----------|-------------------|---------|
/// | 0         | `P`               | Present |
/// | 1         | `RW`              | Writable |
/// | 2         | `US`              | User-mode accessible |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Cache disable |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page / PAT at L1 |
/// | 8         | `G`               | Global (leaf only) |
/// | 9–11      | OS avail low      | Ignored by hardware |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Ignored by hardware |
/// | 59–62     | `PKU`             | Protection key |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
/// # use kernel_vmem::PageEntryBits;
/// let frame = PhysicalPage::<Size4K>::from_index(0x12345);
/// let e = PageEntryBits::present_writable(frame);
/// assert_eq!(e.into_bits(), 0x1234_5003);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write to a leaf.
    pub dirty: bool,

    /// Large Page (PS, bit 7). Must be clear for everything built here.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (bits 59..=62).
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Present, writable, supervisor-only entry for `frame`.
    #[inline]
    #[must_use]
    pub const fn present_writable(frame: PhysicalPage<Size4K>) -> Self {
        let mut bits = Self::new().with_present(true).with_writable(true);
        bits.set_physical_address(frame.base());
        bits
    }
}
