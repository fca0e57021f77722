//! # Fixed-Offset Physical Window
//!
//! A [`PhysMapper`] for address spaces in which all of physical memory is
//! mapped linearly at some virtual offset: physical address `pa` is reachable
//! at `offset + pa`.
//!
//! In the kernel the offset is [`PHYS_WINDOW_BASE`]. In tests it is the host
//! address of a buffer standing in for RAM, so physical address `0` is the
//! first byte of that buffer.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::OffsetPhysMapper;
//! use kernel_vmem::addresses::{PhysicalAddress, VirtualAddress};
//!
//! let mapper = OffsetPhysMapper::new(0xffff_8880_0000_0000);
//! let va = mapper.phys_to_virt(PhysicalAddress::new(0x1234_5000));
//! assert_eq!(va.as_u64(), 0xffff_8880_1234_5000);
//! assert_eq!(mapper.virt_to_phys(va), Some(PhysicalAddress::new(0x1234_5000)));
//! assert_eq!(mapper.virt_to_phys(VirtualAddress::new(0x1000)), None);
//! ```

use kernel_info::memory::PHYS_WINDOW_BASE;
use kernel_vmem::PhysMapper;
use kernel_vmem::addresses::{PhysicalAddress, VirtualAddress};

/// [`PhysMapper`] adding a constant offset to physical addresses.
///
/// # Safety
/// - `[offset, offset + top of RAM)` must be mapped writable.
/// - The returned references must only be used for memory that is not
///   otherwise borrowed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// The kernel's physical window at [`PHYS_WINDOW_BASE`].
    #[inline]
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(PHYS_WINDOW_BASE)
    }

    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    #[must_use]
    pub const fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.offset.wrapping_add(pa.as_u64()))
    }

    /// Inverse of [`phys_to_virt`](Self::phys_to_virt); `None` below the window.
    #[inline]
    #[must_use]
    pub const fn virt_to_phys(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match va.as_u64().checked_sub(self.offset) {
            Some(pa) => Some(PhysicalAddress::new(pa)),
            None => None,
        }
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.phys_to_virt(pa).as_mut_ptr::<T>();
        // SAFETY: the caller guarantees the window covers `pa` and that the
        // memory is not otherwise borrowed.
        unsafe { &mut *ptr }
    }
}
