use crate::{PageSize, TABLE_INDEX_BITS, TABLE_INDEX_MASK};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Bit position of the L1 (page table) index inside a virtual address.
const L1_SHIFT: u32 = 12;
const L2_SHIFT: u32 = L1_SHIFT + TABLE_INDEX_BITS;
const L3_SHIFT: u32 = L2_SHIFT + TABLE_INDEX_BITS;
const L4_SHIFT: u32 = L3_SHIFT + TABLE_INDEX_BITS;

/// Virtual memory address.
///
/// Canonicality is not validated on construction; use
/// [`VirtualAddress::from_table_indices`] to build canonical addresses from
/// page-table slots.
///
/// ```text
/// | 63‒48 | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
/// | sign  |  L4   |  L3   |  L2   |  L1   | Offset |
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }

    /// Build the canonical address selected by one slot at each paging level.
    ///
    /// Bit 47 is sign-extended into bits 48‒63.
    #[inline]
    #[must_use]
    pub const fn from_table_indices(l4: u16, l3: u16, l2: u16, l1: u16) -> Self {
        let raw = ((l4 as u64 & TABLE_INDEX_MASK) << L4_SHIFT)
            | ((l3 as u64 & TABLE_INDEX_MASK) << L3_SHIFT)
            | ((l2 as u64 & TABLE_INDEX_MASK) << L2_SHIFT)
            | ((l1 as u64 & TABLE_INDEX_MASK) << L1_SHIFT);
        // sign-extend bit 47
        Self((((raw << 16) as i64) >> 16) as u64)
    }

    /// PML4 index (bits 47‒39).
    #[inline]
    #[must_use]
    pub const fn l4_index(self) -> u16 {
        ((self.0 >> L4_SHIFT) & TABLE_INDEX_MASK) as u16
    }

    /// PDPT index (bits 38‒30).
    #[inline]
    #[must_use]
    pub const fn l3_index(self) -> u16 {
        ((self.0 >> L3_SHIFT) & TABLE_INDEX_MASK) as u16
    }

    /// Page directory index (bits 29‒21).
    #[inline]
    #[must_use]
    pub const fn l2_index(self) -> u16 {
        ((self.0 >> L2_SHIFT) & TABLE_INDEX_MASK) as u16
    }

    /// Page table index (bits 20‒12).
    #[inline]
    #[must_use]
    pub const fn l1_index(self) -> u16 {
        ((self.0 >> L1_SHIFT) & TABLE_INDEX_MASK) as u16
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0 & (S::SIZE - 1) == 0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
