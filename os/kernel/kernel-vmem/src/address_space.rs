//! # Address Space (i386, directory-rooted)
//!
//! Strongly-typed helpers to build and inspect a **single** virtual address
//! space: one page directory plus the page tables it references.
//!
//! ## Highlights
//!
//! - [`AddressSpace::build`] lays out a fresh directory: the shared low
//!   region identity mapped, every other slot absent, slot 1023 pointing at
//!   the directory itself.
//! - [`AddressSpace::query`] translates a VA to a PA by walking the tables
//!   through their physical frames; it works whether or not the space is
//!   loaded.
//! - [`AddressSpace::activate`] loads CR3 with this space's directory.
//!
//! Editing the *loaded* space after paging is on goes through
//! [`ActivePageTables`](crate::ActivePageTables) instead.
//!
//! ## Safety
//!
//! - The provided `PhysMapper` must yield **writable** references to table
//!   frames. In the kernel that holds because directory and table frames
//!   come from a pool inside the identity-mapped shared region.

use crate::page_table::bits::{Pde, Pte};
use crate::page_table::pd::{DirectoryIndex, PageDirectory};
use crate::page_table::pt::{PageTable, TableIndex};
use crate::page_table::{ENTRIES_PER_TABLE, split_indices};
use crate::self_map::SELF_MAP_INDEX;
use crate::{FrameAlloc, Mmu, PhysMapper};
use kernel_info::memory::SELF_MAP_BASE;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress};
use log::{debug, info};

/// Largest shared region: every directory slot below the self-map.
pub const MAX_SHARED_SIZE: u32 = SELF_MAP_BASE;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: FrameNumber, // page directory frame
    mapper: &'m M,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("no frame available for a page directory or page table")]
    OutOfFrames,
    #[error("shared size {0:#x} is not a non-zero multiple of 4 KiB below the self-map")]
    InvalidSharedSize(u32),
    #[error("no page table covers {0}")]
    MissingTable(VirtualAddress),
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing directory frame.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: FrameNumber) -> Self {
        Self { root, mapper }
    }

    /// Build a fresh address space with all frames taken from `alloc`.
    ///
    /// - `ceil(shared_size / 4 MiB)` page tables identity map
    ///   `[0, shared_size)` as present, writable, user pages.
    /// - Slots of the last shared table beyond `shared_size` and every other
    ///   directory slot are absent (writable only).
    /// - Slot 1023 maps the directory itself (present, writable).
    ///
    /// # Errors
    /// - [`MapError::InvalidSharedSize`] before anything is allocated.
    /// - [`MapError::OutOfFrames`]; every frame taken so far is handed back.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        shared_size: u32,
    ) -> Result<Self, MapError> {
        if shared_size == 0
            || !shared_size.is_multiple_of(PAGE_SIZE)
            || shared_size > MAX_SHARED_SIZE
        {
            return Err(MapError::InvalidSharedSize(shared_size));
        }

        let root = alloc.alloc_frame().ok_or(MapError::OutOfFrames)?;
        let space = Self { root, mapper };
        let dir = space.directory_mut();
        dir.fill(Pde::absent());

        let shared_pages = shared_size / PAGE_SIZE;
        let tables = shared_pages.div_ceil(ENTRIES_PER_TABLE as u32);

        for t in 0..tables {
            let Some(frame) = alloc.alloc_frame() else {
                space.discard(alloc);
                return Err(MapError::OutOfFrames);
            };

            let table = space.table_mut(frame);
            for e in 0..ENTRIES_PER_TABLE as u16 {
                let page = t * ENTRIES_PER_TABLE as u32 + u32::from(e);
                let entry = if page < shared_pages {
                    Pte::page(FrameNumber::new(page))
                } else {
                    Pte::absent()
                };
                table.set(TableIndex::new(e), entry);
            }

            dir.set(DirectoryIndex::new(t as u16), Pde::table(frame));
        }

        dir.set(SELF_MAP_INDEX, Pde::table(root));

        info!(
            "Built page directory at frame {root} ({tables} shared table(s), {shared_size:#x} bytes identity mapped)"
        );
        Ok(space)
    }

    /// Hand every table frame and the directory frame back to `alloc`.
    #[allow(clippy::cast_possible_truncation)]
    fn discard<A: FrameAlloc>(&self, alloc: &mut A) {
        let dir = self.directory_mut();
        for i in 0..SELF_MAP_INDEX.as_usize() as u16 {
            if let Some(table) = dir.get(DirectoryIndex::new(i)).next_table() {
                alloc.free_frame(table);
            }
        }
        alloc.free_frame(self.root);
        debug!("Discarded partially built directory at frame {}", self.root);
    }

    /// Frame of the page directory.
    #[inline]
    pub const fn root(&self) -> FrameNumber {
        self.root
    }

    /// Borrow the [`PageDirectory`] through its physical frame.
    #[inline]
    pub(crate) fn directory_mut(&self) -> &mut PageDirectory {
        unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.root.base()) }
    }

    /// Borrow a [`PageTable`] through its physical frame.
    #[inline]
    pub(crate) fn table_mut(&self, frame: FrameNumber) -> &mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Read the directory entry at `i`.
    #[must_use]
    pub fn directory_entry(&self, i: DirectoryIndex) -> Pde {
        self.directory_mut().get(i)
    }

    /// Read the page-table entry covering `va`.
    ///
    /// # Errors
    /// [`MapError::MissingTable`] if the directory slot is absent.
    pub fn entry(&self, va: VirtualAddress) -> Result<Pte, MapError> {
        let (pd, pt) = split_indices(va);
        let table = self
            .directory_entry(pd)
            .next_table()
            .ok_or(MapError::MissingTable(va))?;
        Ok(self.table_mut(table).get(pt))
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let frame = self.entry(va).ok()?.page_frame()?;
        Some(frame.join(va.offset()))
    }
}

impl<M: Mmu> AddressSpace<'_, M> {
    /// Load CR3 with this address space's directory.
    ///
    /// # Safety
    /// The code, stack and data in use must be mapped identically in the
    /// target space (the shared region guarantees that for the kernel).
    #[inline]
    pub unsafe fn activate(&self) {
        unsafe { self.mapper.load_directory(self.root) }
    }

    /// Whether CR3 currently points at this directory.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.mapper.current_directory() == self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BumpAlloc, TestPhys};

    #[test]
    fn build_identity_maps_the_shared_region() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(16, 64);

        let aspace = AddressSpace::build(&phys, &mut alloc, 4 * 1024 * 1024).expect("build");
        assert_eq!(aspace.root(), FrameNumber::new(16));

        let first = aspace.directory_entry(DirectoryIndex::new(0));
        assert!(first.present() && first.writable() && !first.user());
        assert_eq!(first.frame(), FrameNumber::new(17));

        let next = aspace.directory_entry(DirectoryIndex::new(1));
        assert_eq!(next, Pde::absent());

        let me = aspace.directory_entry(SELF_MAP_INDEX);
        assert!(me.present() && me.writable());
        assert_eq!(me.frame(), aspace.root());

        for va in [0u32, 0x1234, 0x003F_FFFF] {
            let va = VirtualAddress::new(va);
            assert_eq!(aspace.query(va), Some(PhysicalAddress::new(va.as_u32())));
            let e = aspace.entry(va).unwrap();
            assert!(e.present() && e.writable() && e.user());
        }
        assert_eq!(aspace.query(VirtualAddress::new(0x0040_0000)), None);
        assert_eq!(
            aspace.entry(VirtualAddress::new(0x0040_0000)),
            Err(MapError::MissingTable(VirtualAddress::new(0x0040_0000)))
        );
    }

    #[test]
    fn partial_last_table_leaves_slots_absent() {
        let phys = TestPhys::with_frames(64);
        let mut alloc = BumpAlloc::new(0, 64);

        let aspace = AddressSpace::build(&phys, &mut alloc, 4 * 1024 * 1024 + 8192).expect("build");
        let second = aspace.directory_entry(DirectoryIndex::new(1));
        assert!(second.present());

        assert!(aspace.entry(VirtualAddress::new(0x0040_1000)).unwrap().present());
        assert_eq!(
            aspace.entry(VirtualAddress::new(0x0040_2000)).unwrap(),
            Pte::absent()
        );
    }

    #[test]
    fn out_of_frames_returns_everything() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = BumpAlloc::new(0, 2);

        let err = AddressSpace::build(&phys, &mut alloc, 8 * 1024 * 1024)
            .err()
            .expect("must fail");
        assert_eq!(err, MapError::OutOfFrames);
        alloc.freed.sort();
        assert_eq!(alloc.freed, vec![FrameNumber::new(0), FrameNumber::new(1)]);
    }

    #[test]
    fn invalid_shared_size_allocates_nothing() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = BumpAlloc::new(0, 8);
        for size in [0, 100, SELF_MAP_BASE + PAGE_SIZE] {
            assert_eq!(
                AddressSpace::build(&phys, &mut alloc, size).err(),
                Some(MapError::InvalidSharedSize(size))
            );
        }
        assert_eq!(alloc.alloc_frame(), Some(FrameNumber::new(0)));
    }

    #[test]
    fn activate_loads_cr3() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = BumpAlloc::new(2, 8);
        let aspace = AddressSpace::build(&phys, &mut alloc, 0x1000).expect("build");
        assert!(!aspace.is_active());
        unsafe { aspace.activate() };
        assert!(aspace.is_active());
        assert_eq!(phys.cr3.get(), 0x2000);
    }
}
