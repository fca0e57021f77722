//! # Usable Physical Memory
//!
//! The boot loader's memory map, reduced to what the frame allocator needs: a
//! single `[start, end)` range of physical memory it may manage, and which
//! frames inside it are actually RAM.

use crate::memory::FRAME_SIZE;
use kernel_memory_addresses::{PhysicalAddress, Size4K};

/// Classification of a boot memory-map entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// RAM free for the kernel to use.
    Available,
    /// Anything else (firmware, ACPI, MMIO holes, defective RAM).
    Reserved,
}

/// One entry of the boot memory map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    pub start: PhysicalAddress,
    pub len: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(start: PhysicalAddress, len: u64, kind: MemoryRegionKind) -> Self {
        Self { start, len, kind }
    }

    /// Exclusive end, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start.as_u64().saturating_add(self.len))
    }

    /// Whether the whole frame starting at `frame` lies inside this region.
    #[must_use]
    pub const fn covers_frame(&self, frame: PhysicalAddress) -> bool {
        self.start.as_u64() <= frame.as_u64()
            && frame.as_u64().saturating_add(FRAME_SIZE) <= self.end().as_u64()
    }

    /// Whether any byte of the frame starting at `frame` lies inside this region.
    #[must_use]
    pub const fn overlaps_frame(&self, frame: PhysicalAddress) -> bool {
        self.start.as_u64() < frame.as_u64().saturating_add(FRAME_SIZE)
            && frame.as_u64() < self.end().as_u64()
    }
}

/// Whether the frame starting at `frame` is RAM the kernel may use.
///
/// The frame must be fully covered by an available region and touched by no
/// reserved one; frames the map does not mention at all are unusable.
#[must_use]
pub fn frame_is_available(regions: &[MemoryRegion], frame: PhysicalAddress) -> bool {
    let mut covered = false;
    for r in regions {
        match r.kind {
            MemoryRegionKind::Available => covered |= r.covers_frame(frame),
            MemoryRegionKind::Reserved if r.overlaps_frame(frame) => return false,
            MemoryRegionKind::Reserved => {}
        }
    }
    covered
}

/// `[start, end)` physical memory available for frame allocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UsableRange {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl UsableRange {
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { start, end }
    }

    /// Derive the range from the boot memory map.
    ///
    /// Everything below `kernel_end` (low memory and the kernel image) is
    /// excluded; the upper bound is the highest end of any available region.
    /// Returns `None` if no available memory lies above the kernel.
    #[must_use]
    pub fn from_regions<I>(kernel_end: PhysicalAddress, regions: I) -> Option<Self>
    where
        I: IntoIterator<Item = MemoryRegion>,
    {
        let high = regions
            .into_iter()
            .filter(|r| r.kind == MemoryRegionKind::Available)
            .map(|r| r.end())
            .max()?;
        (high > kernel_end).then_some(Self::new(kernel_end, high))
    }

    /// Shrink to whole frames: start rounded up, end rounded down.
    ///
    /// Returns `None` if no whole frame remains.
    #[must_use]
    pub const fn frame_aligned(self) -> Option<Self> {
        let Some(start) = self.start.align_up::<Size4K>() else {
            return None;
        };
        let end = self.end.align_down::<Size4K>();
        if start.as_u64() < end.as_u64() {
            Some(Self::new(start, end))
        } else {
            None
        }
    }

    /// Number of whole frames fully inside the range.
    #[must_use]
    pub const fn frame_count(self) -> u64 {
        match self.frame_aligned() {
            Some(r) => (r.end.as_u64() - r.start.as_u64()) >> crate::memory::FRAME_SHIFT,
            None => 0,
        }
    }
}
