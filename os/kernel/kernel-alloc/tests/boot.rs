use kernel_alloc::frame_alloc::{BitmapFrameAlloc, FrameAllocError, FrameOrder};
use kernel_alloc::mm::MemoryManager;
use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_info::memory::PAGE_ALLOC_BASE;
use kernel_info::memory_map::{MemoryRegion, MemoryRegionKind, UsableRange};
use kernel_vmem::addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_vmem::{PhysMapper, table_mut};

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

fn ram(frames: usize) -> Vec<Frame> {
    (0..frames).map(|_| Frame([0x5a; 4096])).collect()
}

#[test]
fn boot_from_memory_map() {
    let mut ram = ram(64);
    let mapper = OffsetPhysMapper::new(ram.as_mut_ptr() as u64);

    // Frame 0 is the PDPT, frames 1 and 2 the "kernel image".
    let pdpt = PhysicalPage::from_index(0);
    unsafe { table_mut(&mapper, pdpt) }.zero();

    let regions = [
        MemoryRegion::new(PhysicalAddress::zero(), 0x2_0000, MemoryRegionKind::Available),
        MemoryRegion::new(PhysicalAddress::new(0x2_0000), 0x1000, MemoryRegionKind::Reserved),
        MemoryRegion::new(PhysicalAddress::new(0x2_1000), 0x1f000, MemoryRegionKind::Available),
    ];
    let kernel_end = PhysicalAddress::new(0x2fff);
    let range = UsableRange::from_regions(kernel_end, regions).unwrap();
    assert_eq!(range.end.as_u64(), 64 * 4096);

    let base = VirtualAddress::new(PAGE_ALLOC_BASE);
    let mut mm = unsafe { MemoryManager::init(&mapper, kernel_end, &regions, pdpt, base) }.unwrap();

    // Map storage in frame 3; page directory and first table in 4 and 5.
    // The reserved frame at 0x20000 is never free.
    assert_eq!(mm.frames().usable_range().start.as_u64(), 0x4000);
    assert_eq!(mm.frames().free_frame_count(), 64 - 6 - 1);

    let mut last = None;
    for _ in 0..10 {
        let va = mm.alloc_page().unwrap();
        if let Some(prev) = last {
            assert_eq!(va, prev + 4096);
        }
        last = Some(va);

        // The page is backed by zeroable, writable memory.
        let pa = mm.pages().translate(va).unwrap();
        let bytes: &mut [u8; 4096] = unsafe { mapper.phys_to_mut(pa) };
        bytes.fill(0);
    }
    assert_eq!(mm.pages().next_address(), base + 10 * 4096);

    let mut left = 0;
    while let Ok(frame) = mm.alloc_frames(FrameOrder::SINGLE) {
        assert_ne!(frame.base().as_u64(), 0x2_0000, "reserved frame handed out");
        left += 1;
    }
    assert_eq!(left, 64 - 6 - 1 - 10);
}

#[test]
fn reserved_frame_survives_a_full_drain() {
    let mut ram = ram(64);
    let mapper = OffsetPhysMapper::new(ram.as_mut_ptr() as u64);
    let regions = [
        MemoryRegion::new(PhysicalAddress::zero(), 0x2_0000, MemoryRegionKind::Available),
        MemoryRegion::new(PhysicalAddress::new(0x2_0000), 0x1000, MemoryRegionKind::Reserved),
        MemoryRegion::new(PhysicalAddress::new(0x2_1000), 0x1f000, MemoryRegionKind::Available),
    ];
    let range = UsableRange::from_regions(PhysicalAddress::new(0x2fff), regions).unwrap();

    let mut frames = unsafe { BitmapFrameAlloc::init_from_map(&mapper, range, &regions) }.unwrap();
    let mut handed_out = Vec::new();
    while let Ok(frame) = frames.alloc_frame() {
        handed_out.push(frame.base().as_u64());
    }
    assert!(!handed_out.contains(&0x2_0000));
    assert_eq!(handed_out.len(), 64 - 4 - 1);

    // Neither the 16-frame block around it nor a quad over it can be formed.
    for f in handed_out {
        frames.free_frame(PhysicalPage::from_index(f >> 12)).unwrap();
    }
    while let Ok(block) = frames.alloc(FrameOrder::QUAD) {
        let span = block.base().as_u64()..block.base().as_u64() + 4 * 4096;
        assert!(!span.contains(&0x2_0000));
    }
}

#[test]
fn sixteen_frames_then_a_quad() {
    let mut ram = ram(17);
    let mapper = OffsetPhysMapper::new(ram.as_mut_ptr() as u64);
    let range = UsableRange::new(PhysicalAddress::zero(), PhysicalAddress::new(17 * 4096));

    let mut frames = unsafe { BitmapFrameAlloc::init(&mapper, range) }.unwrap();
    assert_eq!(frames.free_frame_count(), 16);

    let mut taken = Vec::new();
    for _ in 0..16 {
        let f = frames.alloc(FrameOrder::SINGLE).unwrap();
        assert!(!taken.contains(&f));
        taken.push(f);
    }
    assert_eq!(
        frames.alloc(FrameOrder::SINGLE),
        Err(FrameAllocError::OutOfPhysicalMemory { order: 0 })
    );

    for f in taken {
        frames.free(f, FrameOrder::SINGLE).unwrap();
    }
    let quad = frames.alloc(FrameOrder::QUAD).unwrap();
    assert!(quad.base().as_u64().is_multiple_of(4 * 4096));
    assert_eq!(quad.base().as_u64(), 0x4000);
}
