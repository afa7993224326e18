//! # Virtual Memory Support
//!
//! i386 two-level paging helpers for the kernel's demand pager.
//!
//! ## What you get
//! - An [`address space`](address_space) describing one page directory and
//!   its tables, built with the shared region identity mapped and the last
//!   directory slot pointing back at the directory itself.
//! - [`ActivePageTables`], which edits the **loaded** directory through that
//!   recursive self-map instead of through physical addresses.
//! - Bit-exact [`Pde`]/[`Pte`] entry layouts and the 4 KiB-aligned
//!   [`PageDirectory`]/[`PageTable`] wrappers.
//! - The hardware seams: [`PhysMapper`] (touch a physical frame),
//!   [`Mmu`] (CR0/CR2/CR3 and translated access) and [`FrameAlloc`].
//! - The page-fault [error code and register frame](fault).
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! Each 32-bit linear address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! ```text
//!  CR3 → Page Directory ──► PDE → Page Table ──► PTE → 4 KiB frame
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | 1024 entries; each points to a page table covering 4 MiB. Referenced by CR3. |
//! | 2 | **PT** (Page Table) | **PTE** | 1024 entries; each maps one 4 KiB page. |
//!
//! 4 MiB pages (`PS=1` in a PDE) are never created.
//!
//! ### Recursive self-map
//!
//! Directory entry 1023 holds the directory's own frame. The walk for any
//! address in the top 4 MiB therefore uses the directory as a page table:
//!
//! ```text
//! 0xFFFF_F000                   → the page directory itself
//! 0xFFC0_0000 | (pd_index << 12) → the page table of directory slot pd_index
//! ```
//!
//! See [`self_map`] for the encoders.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod active;
pub mod address_space;
pub mod fault;
mod page_table;
pub mod self_map;

pub use crate::active::ActivePageTables;
pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_table::bits::{Pde, Pte};
pub use crate::page_table::pd::{DirectoryIndex, PageDirectory};
pub use crate::page_table::pt::{PageTable, TableIndex};
pub use crate::page_table::{ENTRIES_PER_TABLE, split_indices};
pub use kernel_memory_addresses as addresses;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page directories and page tables.
///
/// The implementation decides where frames come from (a frame pool, a bump
/// region in tests). Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB physical frame.
    fn alloc_frame(&mut self) -> Option<FrameNumber>;

    /// Give back a frame obtained from [`alloc_frame`](Self::alloc_frame).
    fn free_frame(&mut self, frame: FrameNumber);
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space.
///
/// Typical patterns:
/// - **Kernel**: the shared low region is identity mapped in every address
///   space, so page-directory and page-table frames taken from the kernel
///   pool are reachable at their physical address whether or not paging is
///   on.
/// - **Tests**: an in-memory vector of frames stands in for RAM.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be reachable (identity mapped or paging disabled) and
    ///   writable for `&mut T`.
    /// - Lifetime `'a` is purely borrow-checked; the mapping must remain
    ///   valid for `'a`.
    /// - Type `T` must match the bytes at `pa` (no aliasing UB).
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// The paging unit of the processor: the control registers the pager reads
/// and writes, plus access to memory through the current translation.
///
/// All methods take `&self`; a simulated implementation keeps its register
/// state behind interior mutability.
pub trait Mmu: PhysMapper {
    /// The linear address of the most recent page fault (CR2).
    fn fault_address(&self) -> VirtualAddress;

    /// The frame of the loaded page directory (CR3).
    fn current_directory(&self) -> FrameNumber;

    /// Load `directory` into CR3. Flushes all non-global TLB entries.
    ///
    /// # Safety
    /// The directory must be fully built and map the running code, its stack
    /// and the self-map slot.
    unsafe fn load_directory(&self, directory: FrameNumber);

    /// Whether CR0.PG is set.
    fn paging_enabled(&self) -> bool;

    /// Set CR0.PG.
    ///
    /// # Safety
    /// CR3 must hold a valid directory that identity maps the code executing
    /// the switch.
    unsafe fn enable_paging(&self);

    /// Access memory at a *virtual* address through the current translation.
    ///
    /// # Safety
    /// `va` must be mapped writable in the loaded directory (or identity
    /// reachable while paging is off), and `T` must match the bytes there.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T;

    /// Reload CR3 with its current value, discarding stale translations.
    ///
    /// # Safety
    /// Same as [`load_directory`](Self::load_directory).
    unsafe fn flush_tlb(&self) {
        let directory = self.current_directory();
        unsafe { self.load_directory(directory) }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! RAM stand-in for the unit tests of this crate.

    use super::*;
    use core::cell::Cell;

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(align(4096))]
    pub struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    impl Aligned4K {
        fn new_zeroed() -> Self {
            Self([0u8; 4096])
        }
    }

    /// A tiny in-memory "RAM" starting at physical address 0.
    ///
    /// Also acts as an [`Mmu`] so that the recursive self-map can be
    /// exercised: `virt_to_mut` performs the two-level walk through the
    /// directory in `cr3`.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
        pub cr2: Cell<u32>,
        pub cr3: Cell<u32>,
        pub paging: Cell<bool>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K::new_zeroed());
            }
            Self {
                frames: v,
                cr2: Cell::new(0),
                cr3: Cell::new(0),
                paging: Cell::new(false),
            }
        }

        fn frame_mut_ptr(&self, idx: usize) -> *mut u8 {
            (&raw const self.frames[idx]).cast::<u8>().cast_mut()
        }

        fn walk(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
            let (pd, pt) = split_indices(va);
            let dir = unsafe {
                self.phys_to_mut::<PageDirectory>(FrameNumber::new(self.cr3.get() >> 12).base())
            };
            let pde = dir.get(pd);
            if !pde.present() {
                return None;
            }
            let table = unsafe { self.phys_to_mut::<PageTable>(pde.frame().base()) };
            let pte = table.get(pt);
            pte.present().then(|| pte.frame().join(va.offset()))
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = (pa.as_u32() >> 12) as usize;
            let off = (pa.as_u32() & 0xfff) as usize;
            unsafe { &mut *self.frame_mut_ptr(idx).add(off).cast::<T>() }
        }
    }

    impl Mmu for TestPhys {
        fn fault_address(&self) -> VirtualAddress {
            VirtualAddress::new(self.cr2.get())
        }

        fn current_directory(&self) -> FrameNumber {
            FrameNumber::new(self.cr3.get() >> 12)
        }

        unsafe fn load_directory(&self, directory: FrameNumber) {
            self.cr3.set(directory.base().as_u32());
        }

        fn paging_enabled(&self) -> bool {
            self.paging.get()
        }

        unsafe fn enable_paging(&self) {
            self.paging.set(true);
        }

        unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
            let pa = if self.paging.get() {
                self.walk(va).expect("unmapped access in test")
            } else {
                PhysicalAddress::new(va.as_u32())
            };
            unsafe { self.phys_to_mut(pa) }
        }
    }

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    pub struct BumpAlloc {
        next: u32,
        end: u32,
        pub freed: Vec<FrameNumber>,
    }

    impl BumpAlloc {
        pub const fn new(start: u32, end: u32) -> Self {
            Self {
                next: start,
                end,
                freed: Vec::new(),
            }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_frame(&mut self) -> Option<FrameNumber> {
            if self.next >= self.end {
                return None;
            }
            let f = self.next;
            self.next += 1;
            Some(FrameNumber::new(f))
        }

        fn free_frame(&mut self, frame: FrameNumber) {
            self.freed.push(frame);
        }
    }
}
