//! # Physical and Virtual Address Types (i386)
//!
//! Strongly typed wrappers for the 32-bit addresses, frame numbers and page
//! numbers used by the frame pools and the two-level page tables.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | A physical byte address (RAM or MMIO). |
//! | [`VirtualAddress`] | A linear address, translated by the MMU once paging is on. |
//! | [`FrameNumber`] | Index of a 4 KiB physical frame (`address >> 12`). |
//! | [`VirtualPage`] | Page-aligned base of a 4 KiB virtual page. |
//! | [`PageOffset`] | Byte offset inside a 4 KiB page (`0..4096`). |
//!
//! Only one page size exists: the kernel does not use 4 MiB pages.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x2000_1234);
//! let (page, off) = va.split();
//! assert_eq!(page.base().as_u32(), 0x2000_1000);
//! assert_eq!(off.as_u32(), 0x234);
//! assert_eq!(page.join(off), va);
//!
//! let frame = FrameNumber::containing(PhysicalAddress::new(0x0040_0042));
//! assert_eq!(frame.as_u32(), 0x400);
//! assert_eq!(frame.base().as_u32(), 0x0040_0000);
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]`, `Copy`, `Eq`, `Ord` and `Hash`.
//! - Conversions between frames and addresses are `const fn`.
//! - Arithmetic on addresses is checked where a wrap would silently cross
//!   the 4 GiB boundary; callers get `None` instead.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame_number;
mod memory_address;
mod page_offset;
mod physical_address;
mod virtual_address;
mod virtual_page;

pub use crate::frame_number::FrameNumber;
pub use crate::memory_address::MemoryAddress;
pub use crate::page_offset::PageOffset;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

/// Size of a page / frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`, the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

/// Round `x` down to a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn page_align_down(x: u32) -> u32 {
    x & !(PAGE_SIZE - 1)
}

/// Round `x` up to a multiple of [`PAGE_SIZE`].
///
/// Returns `None` if the rounded value does not fit into 32 bits.
///
/// ```rust
/// # use kernel_memory_addresses::page_align_up;
/// assert_eq!(page_align_up(0), Some(0));
/// assert_eq!(page_align_up(1), Some(4096));
/// assert_eq!(page_align_up(4096), Some(4096));
/// assert_eq!(page_align_up(u32::MAX), None);
/// ```
#[inline]
#[must_use]
pub const fn page_align_up(x: u32) -> Option<u32> {
    match x.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(page_align_down(v)),
        None => None,
    }
}

/// Number of whole pages needed to cover `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}
