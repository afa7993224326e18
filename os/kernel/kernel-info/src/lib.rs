//! # Kernel Memory Configuration
//!
//! This crate is the single source of truth for the physical and virtual
//! memory layout of the kernel. Every other memory crate (frame pools, page
//! tables, VM pools) reads its boundaries from here instead of hard-coding
//! them, so the layout can only drift in one place.
//!
//! ## Physical Memory Layout
//!
//! The machine is assumed to have 32 MiB of RAM. The low 4 MiB are shared by
//! every address space and identity mapped; the kernel frame pool lives
//! inside that window so page-table frames can be touched before (and after)
//! paging is turned on.
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Kernel image, BIOS, VGA        │
//! 0x0020_0000 ├─────────────────────────────────┤ KERNEL_POOL_START_FRAME
//!             │  Kernel frame pool (2 MiB)      │  directories, page tables,
//!             │                                 │  frame pool bitmaps
//! 0x0040_0000 ├─────────────────────────────────┤ PROCESS_POOL_START_FRAME (= SHARED_SIZE)
//!             │  Process frame pool (28 MiB)    │  demand-paged data frames
//! 0x00F0_0000 │  ┌───────────────────────────┐  │ MEM_HOLE_START_FRAME
//!             │  │  1 MiB memory hole        │  │  never handed out
//! 0x0100_0000 │  └───────────────────────────┘  │
//! 0x0200_0000 └─────────────────────────────────┘ PHYS_MEMORY_END
//! ```
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Shared identity map (4 MiB)    │
//! 0x0040_0000 ├─────────────────────────────────┤
//!             │  Demand-paged, VM pool owned    │
//! 0x2000_0000 │  code pool (256 MiB)            │ CODE_POOL_BASE
//! 0x4000_0000 │  heap pool (256 MiB)            │ HEAP_POOL_BASE
//! 0xFFC0_0000 ├─────────────────────────────────┤ SELF_MAP_BASE
//!             │  Recursive page-table window    │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! All values are `const` and validated with compile-time assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
