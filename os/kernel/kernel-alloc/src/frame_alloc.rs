//! # Physical Frame Allocator
//!
//! Hands out naturally aligned blocks of `2^order` frames for **even**
//! orders (1, 4, 16, ... frames), tracked in a [`GroupAvailabilityMap`].
//!
//! ## Allocation
//! 1. Scan the top-level groups left to right for the first code `>= order + 1`.
//! 2. Descend, always taking the first of the four children whose code
//!    still satisfies the request, down to level `order / 2`.
//! 3. Mark that group (and everything beneath it) allocated and recompute
//!    its ancestors.
//!
//! Freeing runs the same steps in reverse: the group (and everything beneath
//! it) becomes free as a whole and its ancestors are recomputed.
//!
//! ## Bootstrapping
//! The map is stored in the managed memory itself: [`BitmapFrameAlloc::init`]
//! carves it out of the low end of the usable range and then frees every
//! remaining frame one by one, building all codes bottom-up.
//! [`BitmapFrameAlloc::init_from_map`] additionally withholds every frame the
//! boot memory map does not report as available RAM.

use crate::group_map::{Avail, GroupAvailabilityMap, Level, TreeLayout, TreeLayoutError};
use kernel_info::memory::{FRAME_SHIFT, FRAME_SIZE, MAX_PAGE_ORDER};
use kernel_info::memory_map::{MemoryRegion, UsableRange, frame_is_available};
use kernel_vmem::addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{debug, info, trace, warn};

/// log2 of a block's frame count.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameOrder(u8);

impl FrameOrder {
    /// A single frame.
    pub const SINGLE: Self = Self(0);

    /// Four frames (16 KiB).
    pub const QUAD: Self = Self(2);

    /// The largest supported block.
    pub const MAX: Self = Self(MAX_PAGE_ORDER);

    #[inline]
    #[must_use]
    pub const fn new(order: u8) -> Self {
        Self(order)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Number of frames in a block of this order.
    #[inline]
    #[must_use]
    pub const fn frames(self) -> u64 {
        1 << self.0
    }

    /// Size of a block of this order in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        FRAME_SIZE << self.0
    }

    /// The tree level blocks of this order live at.
    ///
    /// # Errors
    /// [`FrameAllocError::OddOrder`] or [`FrameAllocError::OrderTooLarge`].
    pub const fn level(self) -> Result<Level, FrameAllocError> {
        if self.0 > MAX_PAGE_ORDER {
            return Err(FrameAllocError::OrderTooLarge(self.0));
        }
        if self.0 % 2 != 0 {
            return Err(FrameAllocError::OddOrder(self.0));
        }
        Ok(Level::new(self.0 / 2))
    }
}

impl core::fmt::Display for FrameOrder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("no free block of order {order}")]
    OutOfPhysicalMemory { order: u8 },
    #[error("order {0} is odd; only even orders can be allocated")]
    OddOrder(u8),
    #[error("order {0} exceeds the largest supported order")]
    OrderTooLarge(u8),
    #[error("{frame} is not aligned to a block of order {order}")]
    MisalignedFree { frame: PhysicalAddress, order: u8 },
    #[error("block of order {order} at {frame} is outside the managed range")]
    OutOfRange { frame: PhysicalAddress, order: u8 },
    #[error("block of order {order} at {frame} is already (partially) free")]
    DoubleFree { frame: PhysicalAddress, order: u8 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocInitError {
    #[error("{0} frames are too few to manage (need at least 4)")]
    TooFewFrames(u64),
    #[error("{0} frames need more tree levels than supported")]
    TooManyLevels(u64),
    #[error("availability map needs {required} bytes but the usable range has {available}")]
    BitmapDoesNotFit { required: u64, available: u64 },
}

impl From<TreeLayoutError> for FrameAllocInitError {
    fn from(e: TreeLayoutError) -> Self {
        match e {
            TreeLayoutError::TooFewFrames(n) => Self::TooFewFrames(n as u64),
            TreeLayoutError::TooManyLevels(n) => Self::TooManyLevels(n as u64),
        }
    }
}

/// Buddy-style allocator over power-of-four frame groups.
pub struct BitmapFrameAlloc<'m> {
    map: GroupAvailabilityMap<'m>,
    layout: TreeLayout,
    /// First allocatable frame (just above the map's own storage).
    low: PhysicalAddress,
    /// End of managed memory (exclusive).
    high: PhysicalAddress,
}

impl<'m> BitmapFrameAlloc<'m> {
    /// Build the allocator over `range`, storing the map at its low end.
    ///
    /// The range is shrunk to whole frames first. Frames below the range are
    /// never handed out, but the map still has entries for them because
    /// group indices are absolute frame numbers.
    ///
    /// # Errors
    /// [`FrameAllocInitError`] if the range is too small to hold the map and
    /// at least one frame, or the tree cannot be built.
    ///
    /// # Safety
    /// - `range` must be unused RAM, reachable writable through `mapper`.
    /// - Nothing else may access `range` for `'m`.
    pub unsafe fn init<M: PhysMapper>(
        mapper: &M,
        range: UsableRange,
    ) -> Result<Self, FrameAllocInitError> {
        let Some(UsableRange { start, end: high }) = range.frame_aligned() else {
            return Err(FrameAllocInitError::TooFewFrames(0));
        };

        #[allow(clippy::cast_possible_truncation)]
        let frame_count = (high.as_u64() >> FRAME_SHIFT) as usize;
        let layout = TreeLayout::new(frame_count)?;

        let words = layout.total_words();
        let required = words as u64 * 8;
        let available = high.as_u64() - start.as_u64();
        let low = match (start + required).align_up::<Size4K>() {
            Some(low) if low < high => low,
            _ => return Err(FrameAllocInitError::BitmapDoesNotFit { required, available }),
        };

        // SAFETY: `[start, start + required)` lies inside `range`, which the
        // caller hands over to us for `'m`.
        let storage: &'m mut [u64] = unsafe { mapper.phys_to_mut_slice(start, words) };
        let map = GroupAvailabilityMap::new(storage, &layout);

        for l in layout.levels() {
            debug!(
                "frame map level {}: {} groups in {} words",
                l.level, l.groups, l.words
            );
        }
        debug!(
            "frame map stored at {start}..{}, managing {low}..{high}",
            start + required
        );

        let mut this = Self {
            map,
            layout,
            low,
            high,
        };
        #[allow(clippy::cast_possible_truncation)]
        let first = (low.as_u64() >> FRAME_SHIFT) as usize;
        for frame in first..frame_count {
            this.release(frame, Level::FRAME);
        }

        info!(
            "frame allocator ready: {} free frames ({} KiB), {} levels",
            this.free_frame_count(),
            this.free_frame_count() as u64 * (FRAME_SIZE / 1024),
            this.max_level().get() + 1
        );
        Ok(this)
    }

    /// Build the allocator over `range` like [`init`](Self::init), then
    /// withhold every frame that `regions` does not report as available.
    ///
    /// Reserved regions and holes the map does not mention stay allocated
    /// forever; [`free`](Self::free) does not know about them.
    ///
    /// # Errors
    /// See [`init`](Self::init).
    ///
    /// # Safety
    /// As for [`init`](Self::init), except that only the available frames of
    /// `range` need to be RAM. The map's own storage at the start of `range`
    /// must be available.
    pub unsafe fn init_from_map<M: PhysMapper>(
        mapper: &M,
        range: UsableRange,
        regions: &[MemoryRegion],
    ) -> Result<Self, FrameAllocInitError> {
        // SAFETY: forwarded to the caller.
        let mut this = unsafe { Self::init(mapper, range) }?;
        let withheld = this.withhold_unavailable(regions);
        if withheld > 0 {
            info!(
                "withheld {withheld} frames outside available memory, {} free",
                this.free_frame_count()
            );
        }
        Ok(this)
    }

    /// Allocate a naturally aligned block of `2^order` frames.
    ///
    /// # Errors
    /// - [`FrameAllocError::OddOrder`] / [`FrameAllocError::OrderTooLarge`]
    ///   for unsupported orders.
    /// - [`FrameAllocError::OutOfPhysicalMemory`] if no such block is free;
    ///   the allocator is left unchanged.
    pub fn alloc(&mut self, order: FrameOrder) -> Result<PhysicalPage<Size4K>, FrameAllocError> {
        let target = order.level()?;
        let oom = FrameAllocError::OutOfPhysicalMemory { order: order.get() };
        let top = self.layout.max_level();
        if target > top {
            return Err(oom);
        }

        let want = Avail::free_block(order.get());
        let mut level = top;
        let mut group = (0..self.layout.top_groups())
            .find(|&g| self.map.get(g, level) >= want)
            .ok_or(oom)?;
        while level > target {
            level = level.child();
            group = (4 * group..4 * group + 4)
                .find(|&g| self.map.get(g, level) >= want)
                .ok_or(oom)?;
        }

        self.map.set(group, level, Avail::NONE);
        self.fill_subtree(group, level, |_| Avail::NONE);
        self.propagate(group, level);

        let frame = PhysicalPage::from_index((group as u64) << order.get());
        trace!("alloc order {order}: {frame}");
        Ok(frame)
    }

    /// Return a block obtained from [`alloc`](Self::alloc) with the same order.
    ///
    /// # Errors
    /// - [`FrameAllocError::OddOrder`] / [`FrameAllocError::OrderTooLarge`].
    /// - [`FrameAllocError::MisalignedFree`] if `frame` is not aligned to the
    ///   block size.
    /// - [`FrameAllocError::OutOfRange`] if the block is not fully inside the
    ///   managed range.
    /// - [`FrameAllocError::DoubleFree`] if any part of the block is free.
    pub fn free(
        &mut self,
        frame: PhysicalPage<Size4K>,
        order: FrameOrder,
    ) -> Result<(), FrameAllocError> {
        let level = order.level()?;
        let base = frame.base();
        let o = order.get();

        if !base.as_u64().is_multiple_of(order.bytes()) {
            return Err(FrameAllocError::MisalignedFree { frame: base, order: o });
        }
        let inside = base >= self.low
            && base
                .as_u64()
                .checked_add(order.bytes())
                .is_some_and(|end| end <= self.high.as_u64());
        if !inside || level > self.layout.max_level() {
            return Err(FrameAllocError::OutOfRange { frame: base, order: o });
        }

        #[allow(clippy::cast_possible_truncation)]
        let group = (frame.index() >> o) as usize;
        if !self.map.get(group, level).is_none() {
            return Err(FrameAllocError::DoubleFree { frame: base, order: o });
        }

        self.release(group, level);
        trace!("free order {order}: {frame}");
        Ok(())
    }

    /// Allocate one frame.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfPhysicalMemory`].
    #[inline]
    pub fn alloc_frame(&mut self) -> Result<PhysicalPage<Size4K>, FrameAllocError> {
        self.alloc(FrameOrder::SINGLE)
    }

    /// Free one frame.
    ///
    /// # Errors
    /// See [`free`](Self::free).
    #[inline]
    pub fn free_frame(&mut self, frame: PhysicalPage<Size4K>) -> Result<(), FrameAllocError> {
        self.free(frame, FrameOrder::SINGLE)
    }

    /// Number of free frames.
    #[must_use]
    pub fn free_frame_count(&self) -> usize {
        self.map.free_frames()
    }

    /// The frames this allocator may hand out.
    #[must_use]
    pub const fn usable_range(&self) -> UsableRange {
        UsableRange::new(self.low, self.high)
    }

    #[must_use]
    pub fn max_level(&self) -> Level {
        self.layout.max_level()
    }

    #[must_use]
    pub const fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    /// Availability code of `group` at `level`.
    #[must_use]
    pub fn code(&self, group: usize, level: Level) -> Avail {
        self.map.get(group, level)
    }

    /// Dump the codes of every level from `from` up at `trace!` level.
    pub fn log_state(&self, from: Level) {
        const PER_ROW: usize = 64;
        for l in self.layout.levels().iter().filter(|l| l.level >= from) {
            trace!("level {}:", l.level);
            for start in (0..l.groups).step_by(PER_ROW) {
                let end = (start + PER_ROW).min(l.groups);
                trace!("  {start:>8}: {}", self.map.row(l.level, start..end));
            }
        }
    }

    /// Take every free frame in `[low, high)` that `regions` does not report
    /// as available. Returns the number of frames taken.
    fn withhold_unavailable(&mut self, regions: &[MemoryRegion]) -> usize {
        #[allow(clippy::cast_possible_truncation)]
        let (first, end) = (
            (self.low.as_u64() >> FRAME_SHIFT) as usize,
            (self.high.as_u64() >> FRAME_SHIFT) as usize,
        );

        let mut withheld = 0;
        for frame in first..end {
            let base = PhysicalPage::<Size4K>::from_index(frame as u64).base();
            if frame_is_available(regions, base) || self.map.get(frame, Level::FRAME).is_none() {
                continue;
            }
            trace!("withholding {base}");
            self.map.set(frame, Level::FRAME, Avail::NONE);
            self.propagate(frame, Level::FRAME);
            withheld += 1;
        }
        withheld
    }

    /// Mark `group` free as a whole, with everything beneath it.
    fn release(&mut self, group: usize, level: Level) {
        self.map.set(group, level, level.whole_free());
        self.fill_subtree(group, level, Level::whole_free);
        self.propagate(group, level);
    }

    /// Set every descendant of `group` to `code(descendant level)`.
    fn fill_subtree(&mut self, group: usize, level: Level, code: impl Fn(Level) -> Avail) {
        let mut first = group;
        let mut count = 1;
        let mut level = level;
        while level > Level::FRAME {
            level = level.child();
            first *= 4;
            count *= 4;
            self.map.fill(level, first, count, code(level));
        }
    }

    /// Recompute the ancestors of `group`, stopping at the first unchanged one.
    fn propagate(&mut self, mut group: usize, mut level: Level) {
        let top = self.layout.max_level();
        while level < top {
            level = level.parent();
            group /= 4;
            let merged = Avail::merge(level, self.map.children(group, level));
            if merged == self.map.get(group, level) {
                return;
            }
            self.map.set(group, level, merged);
        }
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_frame().ok()
    }

    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        if let Err(e) = self.free_frame(frame) {
            warn!("ignoring bad frame release: {e}");
        }
    }
}
