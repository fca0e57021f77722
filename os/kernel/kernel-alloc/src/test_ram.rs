//! Host memory standing in for physical RAM in unit tests.

use crate::phys_mapper::OffsetPhysMapper;
use kernel_info::memory_map::UsableRange;
use kernel_vmem::addresses::PhysicalAddress;

/// Filler for fresh frames, so missing zeroing shows up.
const POISON: u8 = 0xAA;

#[repr(C, align(4096))]
pub struct Frame(pub [u8; 4096]);

/// `n` frames of page-aligned memory; physical address 0 is the first byte.
pub struct Ram {
    frames: Vec<Frame>,
}

impl Ram {
    pub fn with_frames(n: usize) -> Self {
        let frames = (0..n).map(|_| Frame([POISON; 4096])).collect();
        Self { frames }
    }

    pub fn mapper(&mut self) -> OffsetPhysMapper {
        OffsetPhysMapper::new(self.frames.as_mut_ptr() as u64)
    }

    pub fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frames.len() as u64 * 4096)
    }

    /// Everything from `start` to the end of the buffer.
    pub fn usable_from(&self, start: u64) -> UsableRange {
        UsableRange::new(PhysicalAddress::new(start), self.end())
    }
}
