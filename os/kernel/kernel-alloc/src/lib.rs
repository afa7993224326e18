//! # Kernel Memory Allocation and Demand Paging
//!
//! Physical frame pools, virtual memory pools and the page-fault driven
//! pager of the kernel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Exception adapter (fault)                  │
//! │    • vector 14 → MemoryContext::handle_fault        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Memory context (vmm)                       │
//! │    • address spaces, load, enable paging            │
//! │    • demand paging, free_page                       │
//! │    • VM pool registry and legitimacy checks         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Frame pools (frame_alloc, frame_pools)     │
//! │    • contiguous runs of 4 KiB frames                │
//! │    • 2-bit state bitmap in an info frame            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame pools ([`frame_alloc`], [`frame_pools`])
//!
//! A [`ContFramePool`](frame_alloc::ContFramePool) hands out contiguous runs
//! of frames, first fit. Runs are given back by their first frame alone,
//! through the [`FramePoolRegistry`](frame_pools::FramePoolRegistry), which
//! finds the owning pool.
//!
//! ### VM pools ([`vm_pool`])
//!
//! Reserve page-rounded regions of virtual address space. Nothing is mapped
//! until a page is touched.
//!
//! ### Memory context ([`vmm`])
//!
//! Builds address spaces whose shared low region is identity mapped, loads
//! them, turns paging on and resolves page faults from the frame pools.
//!
//! ### Physical mapper ([`phys_mapper`])
//!
//! Identity access to physical frames and, on 32-bit x86, the real control
//! registers.
//!
//! ## Integration Points
//!
//! * **kernel-vmem**: entry layouts, address spaces, self-map access
//! * **kernel-info**: frame size and memory layout
//! * **kernel-sync**: the cell the exception adapter reaches the context through
//! * **kernel-registers**: CR0, CR2 and CR3

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod fault;
pub mod frame_alloc;
pub mod frame_pools;
pub mod phys_mapper;
pub mod vm_pool;
pub mod vmm;
