//! # Memory Manager
//!
//! Owns the frame allocator and the single-page allocator and wires them up
//! during boot. There is no global state; whoever holds the
//! [`MemoryManager`] holds all of memory management.

use crate::frame_alloc::{BitmapFrameAlloc, FrameAllocError, FrameAllocInitError, FrameOrder};
use crate::page_alloc::{PageAllocError, VirtualPageAllocator};
use kernel_info::memory_map::{MemoryRegion, UsableRange};
use kernel_vmem::PhysMapper;
use kernel_vmem::addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::info;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryInitError {
    #[error("no available memory above the kernel image at {0}")]
    NoUsableMemory(PhysicalAddress),
    #[error(transparent)]
    Frames(#[from] FrameAllocInitError),
    #[error(transparent)]
    Pages(#[from] PageAllocError),
}

pub struct MemoryManager<'m, M: PhysMapper> {
    frames: BitmapFrameAlloc<'m>,
    pages: VirtualPageAllocator<'m, M>,
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    /// Bring up physical and virtual allocation.
    ///
    /// 1. Derive the usable range from `regions`, starting at `kernel_end`.
    /// 2. Build the frame allocator over it, withholding every frame that is
    ///    not available RAM.
    /// 3. Take two frames for the page directory and first page table of the
    ///    region at `region_base`, linked into `l3_table`.
    ///
    /// # Errors
    /// [`MemoryInitError`] if any step fails.
    ///
    /// # Safety
    /// - Available memory above `kernel_end` must be unused and reachable
    ///   through `mapper`.
    /// - `l3_table` must be the live PDPT responsible for `region_base`.
    /// - See [`BitmapFrameAlloc::init_from_map`] and
    ///   [`VirtualPageAllocator::bootstrap`].
    pub unsafe fn init(
        mapper: &'m M,
        kernel_end: PhysicalAddress,
        regions: &[MemoryRegion],
        l3_table: PhysicalPage<Size4K>,
        region_base: VirtualAddress,
    ) -> Result<Self, MemoryInitError> {
        let range = UsableRange::from_regions(kernel_end, regions.iter().copied())
            .ok_or(MemoryInitError::NoUsableMemory(kernel_end))?;
        let mut frames = unsafe { BitmapFrameAlloc::init_from_map(mapper, range, regions) }?;
        let pages = unsafe {
            VirtualPageAllocator::bootstrap(mapper, l3_table, region_base, &mut frames)
        }?;
        info!(
            "memory manager ready: {} free frames, pages from {region_base}",
            frames.free_frame_count()
        );
        Ok(Self { frames, pages })
    }

    /// # Errors
    /// See [`BitmapFrameAlloc::alloc`].
    pub fn alloc_frames(
        &mut self,
        order: FrameOrder,
    ) -> Result<PhysicalPage<Size4K>, FrameAllocError> {
        self.frames.alloc(order)
    }

    /// # Errors
    /// See [`BitmapFrameAlloc::free`].
    pub fn free_frames(
        &mut self,
        frame: PhysicalPage<Size4K>,
        order: FrameOrder,
    ) -> Result<(), FrameAllocError> {
        self.frames.free(frame, order)
    }

    /// Map one fresh page.
    ///
    /// # Errors
    /// See [`VirtualPageAllocator::alloc_page`].
    pub fn alloc_page(&mut self) -> Result<VirtualAddress, PageAllocError> {
        self.pages.alloc_page(&mut self.frames)
    }

    #[must_use]
    pub const fn frames(&self) -> &BitmapFrameAlloc<'m> {
        &self.frames
    }

    #[must_use]
    pub const fn pages(&self) -> &VirtualPageAllocator<'m, M> {
        &self.pages
    }
}
