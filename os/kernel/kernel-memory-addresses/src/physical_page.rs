use crate::{PageSize, PhysicalAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical page base for size `S`.
///
/// ### Invariants
/// - The low `S::SHIFT` bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x8000)).unwrap();
/// assert_eq!(frame.index(), 8);
/// assert!(PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x8001)).is_none());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _s: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// The page containing `p` (low bits cleared).
    #[inline]
    #[must_use]
    pub const fn from_addr(p: PhysicalAddress) -> Self {
        Self {
            base: crate::align_down(p.as_u64(), S::SIZE),
            _s: PhantomData,
        }
    }

    /// `Some` only if `p` already is a page base.
    #[inline]
    #[must_use]
    pub const fn from_aligned(p: PhysicalAddress) -> Option<Self> {
        if p.is_aligned::<S>() {
            Some(Self::from_addr(p))
        } else {
            None
        }
    }

    /// The `index`-th page of size `S`, counted from physical address 0.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u64) -> Self {
        Self {
            base: index << S::SHIFT,
            _s: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Page number counted from physical address 0.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u64 {
        self.base >> S::SHIFT
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PhysicalPage<{}>({:#018X})",
            core::any::type_name::<S>(),
            self.base
        )
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.base(), f)
    }
}
