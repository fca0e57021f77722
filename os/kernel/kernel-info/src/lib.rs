//! # Kernel Memory Configuration
//!
//! Single source of truth for the memory layout the bootstrap memory manager
//! relies on, and for the boundary with the boot loader's memory map.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Frame geometry**: [`FRAME_SIZE`](memory::FRAME_SIZE), [`FRAME_SHIFT`](memory::FRAME_SHIFT)
//! * **Allocator limits**: [`MAX_PAGE_ORDER`](memory::MAX_PAGE_ORDER)
//! * **Physical window**: [`PHYS_WINDOW_BASE`](memory::PHYS_WINDOW_BASE)
//! * **Page allocator region**: [`PAGE_ALLOC_BASE`](memory::PAGE_ALLOC_BASE)
//!
//! ### Usable Memory ([`memory_map`])
//! Reduces the boot memory map to one [`UsableRange`](memory_map::UsableRange).
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │          (unused)               │
//! PHYS_WINDOW_BASE      ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Physical window               │
//!                       │   (all RAM at a fixed offset)   │
//! PAGE_ALLOC_BASE       ├─────────────────────────────────┤ 0xffff_ffff_4000_0000
//!                       │   Single-page allocator region  │
//!                       │   (one PDPT slot, 1 GiB)        │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
pub mod memory_map;
