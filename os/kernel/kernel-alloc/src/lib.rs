//! # Bootstrap Memory Allocation
//!
//! Physical frame allocation and single-page virtual allocation for a kernel
//! that has no heap yet. Everything here runs before (and underneath) any
//! general-purpose allocator.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Memory Manager ([`mm`])             │
//! │    • Boot-time wiring of both allocators            │
//! └──────────┬──────────────────────────────┬───────────┘
//!            │                              │
//! ┌──────────▼──────────────┐   ┌───────────▼───────────┐
//! │  Frame Allocator        │◄──┤  Page Allocator       │
//! │  ([`frame_alloc`])      │   │  ([`page_alloc`])     │
//! │  • 4^k-frame blocks     │   │  • one page at a time │
//! │  • quad-tree bitmaps    │   │  • grows PD/PT chain  │
//! └──────────┬──────────────┘   └───────────┬───────────┘
//!            │                              │
//! ┌──────────▼──────────────────────────────▼───────────┐
//! │            Physical Window ([`phys_mapper`])        │
//! │    • physical memory at a fixed virtual offset      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//!
//! Hands out naturally aligned blocks of 1, 4, 16, ... frames. Free space is
//! tracked in a [`group_map::GroupAvailabilityMap`], a quad-tree over frames
//! in which each node records the largest free block beneath it:
//! * **Self-hosted**: the map lives at the low end of the memory it manages.
//! * **First fit**: the lowest suitable block is always chosen.
//! * **Checked frees**: misaligned, foreign and double frees are rejected.
//!
//! ### Page Allocator ([`page_alloc`])
//!
//! Maps single frames into a dedicated 1 GiB virtual region and returns
//! their addresses in strictly increasing order. Page tables are added on
//! demand; running out of the region halts the kernel.
//!
//! ### Physical Window ([`phys_mapper`])
//!
//! Implements [`kernel_vmem::PhysMapper`] for a linear mapping of physical
//! memory, which is how both allocators touch their bitmaps and tables.
//!
//! ## Memory Layout Integration
//!
//! ```text
//! 0xFFFF_8880_0000_0000  PHYS_WINDOW_BASE   physical memory, linearly
//!          ...
//! 0xFFFF_FFFF_4000_0000  PAGE_ALLOC_BASE    single-page region (1 GiB)
//! 0xFFFF_FFFF_8000_0000  KERNEL_BASE        kernel image
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, FrameOrder};
//! use kernel_alloc::phys_mapper::OffsetPhysMapper;
//! use kernel_info::memory_map::UsableRange;
//! use kernel_vmem::addresses::PhysicalAddress;
//!
//! #[repr(align(4096))]
//! struct Frame([u8; 4096]);
//!
//! // 64 frames of "physical memory".
//! let mut ram: Vec<Frame> = (0..64).map(|_| Frame([0; 4096])).collect();
//! let mapper = OffsetPhysMapper::new(ram.as_mut_ptr() as u64);
//! let range = UsableRange::new(PhysicalAddress::zero(), PhysicalAddress::new(64 * 4096));
//!
//! let mut frames = unsafe { BitmapFrameAlloc::init(&mapper, range) }?;
//! let block = frames.alloc(FrameOrder::QUAD)?;
//! assert!(block.base().as_u64().is_multiple_of(4 * 4096));
//! frames.free(block, FrameOrder::QUAD)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Concurrency
//!
//! All state changes go through `&mut self`. There is no internal locking;
//! a multi-core kernel wraps the whole [`mm::MemoryManager`] in one lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod frame_alloc;
pub mod group_map;
pub mod mm;
pub mod page_alloc;
pub mod phys_mapper;

#[cfg(test)]
mod test_ram;
