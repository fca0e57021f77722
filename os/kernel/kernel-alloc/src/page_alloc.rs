//! # Single-Page Allocator
//!
//! Maps one frame at a time into a dedicated 1 GiB virtual region (one PDPT
//! slot) and hands out the virtual address. The region is consumed strictly
//! front to back and addresses are never reused.
//!
//! ```text
//! PDPT[base.l3]  ──► PD  [0] [1] [2] ... [limit-1]
//!                         │   │
//!                         ▼   ▼
//!                        PT  PT   (512 pages each)
//! ```
//!
//! When the current page table is full, a fresh frame becomes the next page
//! table and is linked into the page directory. All tables are written
//! through the [`PhysMapper`], so a new table does not have to be mapped
//! before it can be filled.
//!
//! Running out of frames is an ordinary error. Running out of page-directory
//! slots is not recoverable and halts.

use kernel_info::memory::{FRAME_SIZE, PAGE_TABLE_ENTRIES};
use kernel_vmem::addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size4K, VirtualAddress,
};
use kernel_vmem::{
    FrameAlloc, PageTableCursor, PageTableEntry, PhysMapper, TableIndex, table_mut,
};
use log::{debug, error, trace};

/// Usable page-directory slots; the last one stays reserved.
pub const MAX_L2_SLOTS: usize = PAGE_TABLE_ENTRIES - 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageAllocError {
    #[error("out of physical memory")]
    OutOfPhysicalMemory,
    #[error("virtual page region exhausted")]
    VirtualRegionExhausted,
}

/// Bump allocator of mapped 4 KiB pages.
pub struct VirtualPageAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    /// Page directory covering the region.
    l2: PageTableCursor<'m>,
    /// Page table currently being filled.
    l1: PageTableCursor<'m>,
    l1_frame: PhysicalPage<Size4K>,
    base: VirtualAddress,
    next: VirtualAddress,
    l2_limit: usize,
}

impl<'m, M: PhysMapper> VirtualPageAllocator<'m, M> {
    /// Take over `l2_table` and `first_l1` for the region starting at `base`.
    ///
    /// Both tables are cleared and `first_l1` is linked at slot 0 of
    /// `l2_table`. Linking `l2_table` into the PDPT is up to the caller
    /// (see [`bootstrap`](Self::bootstrap)).
    ///
    /// # Safety
    /// - Both frames must be unused and reachable through `mapper`.
    /// - Nothing else may access them for `'m`.
    pub unsafe fn new(
        mapper: &'m M,
        base: VirtualAddress,
        l2_table: PhysicalPage<Size4K>,
        first_l1: PhysicalPage<Size4K>,
    ) -> Self {
        debug_assert!(base.is_aligned::<Size1G>());
        debug_assert_ne!(l2_table, first_l1);

        // SAFETY: exclusive use of both frames is guaranteed by the caller.
        let l2 = unsafe { table_mut(mapper, l2_table) };
        let l1 = unsafe { table_mut(mapper, first_l1) };
        l2.zero();
        l1.zero();
        l2.set(TableIndex::new(0), PageTableEntry::present_writable(first_l1));

        debug!("page allocator: region {base}, first page table {first_l1}");
        Self {
            mapper,
            l2: PageTableCursor::starting_at(l2, 1),
            l1: PageTableCursor::new(l1),
            l1_frame: first_l1,
            base,
            next: base,
            l2_limit: MAX_L2_SLOTS,
        }
    }

    /// Allocate the page directory and first page table from `frames` and
    /// link the directory into `l3_table` at the slot selected by `base`.
    ///
    /// # Errors
    /// [`PageAllocError::OutOfPhysicalMemory`] if two frames are not
    /// available; nothing is leaked.
    ///
    /// # Safety
    /// - `l3_table` must be the PDPT responsible for `base`, reachable through
    ///   `mapper`, and not borrowed elsewhere during the call.
    /// - `frames` must hand out frames reachable through `mapper`.
    pub unsafe fn bootstrap<A: FrameAlloc>(
        mapper: &'m M,
        l3_table: PhysicalPage<Size4K>,
        base: VirtualAddress,
        frames: &mut A,
    ) -> Result<Self, PageAllocError> {
        let l2 = frames
            .alloc_4k()
            .ok_or(PageAllocError::OutOfPhysicalMemory)?;
        let Some(l1) = frames.alloc_4k() else {
            frames.free_4k(l2);
            return Err(PageAllocError::OutOfPhysicalMemory);
        };

        // SAFETY: guaranteed by the caller; the borrow ends with this call.
        let pdpt = unsafe { table_mut(mapper, l3_table) };
        pdpt.set(
            TableIndex::new(base.l3_index()),
            PageTableEntry::present_writable(l2),
        );
        debug!("page allocator: page directory {l2} in PDPT slot {}", base.l3_index());

        // SAFETY: both frames were just allocated for us.
        Ok(unsafe { Self::new(mapper, base, l2, l1) })
    }

    /// Restrict growth to the first `slots` page-directory slots (at least
    /// one, at most [`MAX_L2_SLOTS`]).
    #[must_use]
    pub fn with_l2_limit(mut self, slots: usize) -> Self {
        self.l2_limit = slots.clamp(1, MAX_L2_SLOTS);
        self
    }

    /// Map one fresh frame and return its virtual address.
    ///
    /// # Errors
    /// [`PageAllocError::OutOfPhysicalMemory`] if no frame is available for
    /// the page or a new page table; the next address is unchanged.
    ///
    /// ### Panics
    /// When the region is exhausted (fail-stop).
    pub fn alloc_page<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
    ) -> Result<VirtualAddress, PageAllocError> {
        if self.l1.is_full() {
            self.grow(frames)?;
        }

        let frame = frames
            .alloc_4k()
            .ok_or(PageAllocError::OutOfPhysicalMemory)?;
        if self.l1.push(PageTableEntry::present_writable(frame)).is_err() {
            fail_stop(PageAllocError::VirtualRegionExhausted);
        }

        let va = self.next;
        self.next += FRAME_SIZE;
        trace!("page {va} -> {frame}");
        Ok(va)
    }

    /// Link a fresh page table at the next page-directory slot.
    fn grow<A: FrameAlloc>(&mut self, frames: &mut A) -> Result<(), PageAllocError> {
        if self.l2.position() >= self.l2_limit {
            fail_stop(PageAllocError::VirtualRegionExhausted);
        }

        let frame = frames
            .alloc_4k()
            .ok_or(PageAllocError::OutOfPhysicalMemory)?;
        // SAFETY: the frame was just allocated for us.
        let table = unsafe { table_mut(self.mapper, frame) };
        table.zero();

        let slot = self.l2.position();
        if self.l2.push(PageTableEntry::present_writable(frame)).is_err() {
            fail_stop(PageAllocError::VirtualRegionExhausted);
        }
        self.l1.reset(table);
        self.l1_frame = frame;
        debug!("page allocator: page table {frame} at directory slot {slot}");
        Ok(())
    }

    /// Physical address backing `va`, if `va` was handed out.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if va < self.base || va >= self.next {
            return None;
        }

        let l1_frame = self.l2.table().get(TableIndex::new(va.l2_index())).frame()?;
        let entry = if l1_frame == self.l1_frame {
            self.l1.table().get(TableIndex::new(va.l1_index()))
        } else {
            // SAFETY: full tables are only ever read after growth moved on.
            let table = unsafe { table_mut(self.mapper, l1_frame) };
            table.get(TableIndex::new(va.l1_index()))
        };

        let offset = va.as_u64() & (FRAME_SIZE - 1);
        entry.frame().map(|f| f.base() + offset)
    }

    /// Address the next [`alloc_page`](Self::alloc_page) returns.
    #[must_use]
    pub const fn next_address(&self) -> VirtualAddress {
        self.next
    }

    /// `[base, base + 1 GiB)`.
    #[must_use]
    pub fn region(&self) -> (VirtualAddress, VirtualAddress) {
        (self.base, self.base + Size1G::SIZE)
    }

    /// Number of pages handed out so far.
    #[must_use]
    pub const fn mapped_pages(&self) -> u64 {
        (self.next.as_u64() - self.base.as_u64()) / FRAME_SIZE
    }
}

/// Log `reason` and halt through the panic handler.
#[cold]
#[track_caller]
fn fail_stop(reason: PageAllocError) -> ! {
    error!("page allocator: {reason}; halting");
    panic!("{reason}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_alloc::BitmapFrameAlloc;
    use crate::phys_mapper::OffsetPhysMapper;
    use crate::test_ram::Ram;
    use kernel_info::memory::PAGE_ALLOC_BASE;
    use kernel_vmem::PageTable;

    /// Frame allocator and a zeroed PDPT frame over `ram`.
    fn setup<'m>(
        ram: &Ram,
        mapper: &OffsetPhysMapper,
    ) -> (BitmapFrameAlloc<'m>, PhysicalPage<Size4K>) {
        let mut frames = unsafe { BitmapFrameAlloc::init(mapper, ram.usable_from(0)) }.unwrap();
        let pdpt = frames.alloc_frame().unwrap();
        unsafe { table_mut(mapper, pdpt) }.zero();
        (frames, pdpt)
    }

    fn table<'a>(mapper: &OffsetPhysMapper, frame: PhysicalPage<Size4K>) -> &'a PageTable {
        unsafe { table_mut(mapper, frame) }
    }

    #[test]
    fn bootstrap_links_directory_into_pdpt() {
        let mut ram = Ram::with_frames(64);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        let base = VirtualAddress::new(PAGE_ALLOC_BASE);

        let pages =
            unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) }.unwrap();
        assert_eq!(pages.next_address(), base);
        assert_eq!(pages.region(), (base, base + 0x4000_0000));

        drop(pages);

        let l2 = table(&mapper, pdpt)
            .get(TableIndex::new(base.l3_index()))
            .frame()
            .unwrap();
        assert_eq!(table(&mapper, pdpt).present_count(), 1);
        assert_eq!(table(&mapper, l2).present_count(), 1);
        let l1 = table(&mapper, l2).get(TableIndex::new(0)).frame().unwrap();
        assert_eq!(table(&mapper, l1).present_count(), 0);
    }

    #[test]
    fn pages_are_consecutive_and_mapped() {
        let mut ram = Ram::with_frames(1100);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        let base = VirtualAddress::new(PAGE_ALLOC_BASE);
        let mut pages =
            unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) }.unwrap();

        let mut seen = std::collections::HashSet::new();
        let mut prev = None;
        for i in 0..(PAGE_TABLE_ENTRIES as u64 + 10) {
            let va = pages.alloc_page(&mut frames).unwrap();
            assert_eq!(va, base + i * FRAME_SIZE);
            if let Some(p) = prev {
                assert!(va > p);
            }
            prev = Some(va);

            let pa = pages.translate(va).unwrap();
            assert!(pa.is_aligned::<Size4K>());
            assert!(seen.insert(pa));
            assert_eq!(pages.translate(va + 0x123), Some(pa + 0x123));
        }
        assert_eq!(pages.mapped_pages(), 522);

        // Older page table, reached through the directory.
        let first = pages.translate(base).unwrap();
        assert!(seen.contains(&first));
        assert_eq!(pages.translate(pages.next_address()), None);
        assert_eq!(pages.translate(VirtualAddress::new(0x1000)), None);
    }

    #[test]
    fn written_data_lands_in_the_frame() {
        let mut ram = Ram::with_frames(64);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        let base = VirtualAddress::new(PAGE_ALLOC_BASE);
        let mut pages =
            unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) }.unwrap();

        let va = pages.alloc_page(&mut frames).unwrap();
        let pa = pages.translate(va).unwrap();
        let word: &mut u64 = unsafe { mapper.phys_to_mut(pa + 8) };
        *word = 0xdead_beef;
        let again: &mut u64 = unsafe { mapper.phys_to_mut(pa + 8) };
        assert_eq!(*again, 0xdead_beef);
    }

    #[test]
    fn out_of_frames_is_recoverable() {
        let mut ram = Ram::with_frames(24);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        let base = VirtualAddress::new(PAGE_ALLOC_BASE);
        let mut pages =
            unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) }.unwrap();

        let available = frames.free_frame_count() as u64;
        for _ in 0..available {
            pages.alloc_page(&mut frames).unwrap();
        }
        let next = pages.next_address();
        assert_eq!(
            pages.alloc_page(&mut frames),
            Err(PageAllocError::OutOfPhysicalMemory)
        );
        assert_eq!(pages.next_address(), next);
        assert_eq!(pages.mapped_pages(), available);
    }

    #[test]
    fn out_of_frames_while_growing_is_recoverable() {
        let mut ram = Ram::with_frames(1100);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        let base = VirtualAddress::new(PAGE_ALLOC_BASE);
        let mut pages =
            unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) }.unwrap();

        // Leave exactly enough frames to fill the first page table.
        let mut spare = Vec::new();
        while frames.free_frame_count() > PAGE_TABLE_ENTRIES {
            spare.push(frames.alloc_frame().unwrap());
        }
        for _ in 0..PAGE_TABLE_ENTRIES {
            pages.alloc_page(&mut frames).unwrap();
        }

        let full = base + PAGE_TABLE_ENTRIES as u64 * FRAME_SIZE;
        assert_eq!(pages.next_address(), full);
        assert_eq!(
            pages.alloc_page(&mut frames),
            Err(PageAllocError::OutOfPhysicalMemory)
        );
        assert_eq!(pages.next_address(), full);
        assert_eq!(pages.mapped_pages(), PAGE_TABLE_ENTRIES as u64);
        assert_eq!(pages.translate(full), None);

        // One frame for the new page table, one for the page.
        for frame in spare.drain(..2) {
            frames.free_frame(frame).unwrap();
        }
        assert_eq!(pages.alloc_page(&mut frames), Ok(full));
        assert!(pages.translate(full).is_some());
        assert_eq!(frames.free_frame_count(), 0);
        assert_eq!(pages.next_address(), full + FRAME_SIZE);
    }

    #[test]
    fn bootstrap_without_frames() {
        let mut ram = Ram::with_frames(8);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        while frames.free_frame_count() > 1 {
            frames.alloc_frame().unwrap();
        }

        let base = VirtualAddress::new(PAGE_ALLOC_BASE);
        let r = unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) };
        assert!(matches!(r, Err(PageAllocError::OutOfPhysicalMemory)));
        assert_eq!(frames.free_frame_count(), 1);
        assert_eq!(table(&mapper, pdpt).present_count(), 0);
    }

    #[test]
    #[should_panic(expected = "virtual page region exhausted")]
    fn region_exhaustion_halts() {
        let mut ram = Ram::with_frames(1100);
        let mapper = ram.mapper();
        let (mut frames, pdpt) = setup(&ram, &mapper);
        let base = VirtualAddress::new(PAGE_ALLOC_BASE);
        let mut pages = unsafe { VirtualPageAllocator::bootstrap(&mapper, pdpt, base, &mut frames) }
            .unwrap()
            .with_l2_limit(2);

        for _ in 0..2 * PAGE_TABLE_ENTRIES {
            pages.alloc_page(&mut frames).unwrap();
        }
        let _ = pages.alloc_page(&mut frames);
    }
}
