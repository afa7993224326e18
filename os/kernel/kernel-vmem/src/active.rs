//! # Editing the Loaded Directory
//!
//! Once paging is on, physical frames outside the shared region are no
//! longer reachable by address. [`ActivePageTables`] reaches the loaded
//! directory and its tables through the recursive slot instead, so the
//! pager never needs a physical view of frames from the process pool.

use crate::address_space::MapError;
use crate::page_table::bits::{Pde, Pte};
use crate::page_table::pd::{DirectoryIndex, PageDirectory};
use crate::page_table::pt::PageTable;
use crate::page_table::split_indices;
use crate::self_map::{SELF_MAP_INDEX, directory_window, table_window};
use crate::Mmu;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// View of the directory currently loaded in CR3.
pub struct ActivePageTables<'m, M: Mmu> {
    mmu: &'m M,
}

impl<'m, M: Mmu> ActivePageTables<'m, M> {
    /// # Safety
    /// Paging must be enabled and the loaded directory must carry the
    /// self-map in slot 1023.
    #[inline]
    pub const unsafe fn new(mmu: &'m M) -> Self {
        Self { mmu }
    }

    #[inline]
    fn directory(&self) -> &mut PageDirectory {
        unsafe { self.mmu.virt_to_mut::<PageDirectory>(directory_window()) }
    }

    #[inline]
    fn table(&self, pd: DirectoryIndex) -> &mut PageTable {
        unsafe { self.mmu.virt_to_mut::<PageTable>(table_window(pd)) }
    }

    /// The directory entry covering `va`.
    #[must_use]
    pub fn directory_entry(&self, va: VirtualAddress) -> Pde {
        self.directory().get(DirectoryIndex::from_address(va))
    }

    /// The page-table entry covering `va`.
    ///
    /// # Errors
    /// [`MapError::MissingTable`] if the directory slot is absent.
    pub fn entry(&self, va: VirtualAddress) -> Result<Pte, MapError> {
        let (pd, pt) = split_indices(va);
        if !self.directory().get(pd).present() {
            return Err(MapError::MissingTable(va));
        }
        Ok(self.table(pd).get(pt))
    }

    /// Point the directory slot covering `va` at `frame` (present, writable)
    /// and reset the new table to not-present, user-only entries.
    pub fn install_table(&self, va: VirtualAddress, frame: FrameNumber) {
        let pd = DirectoryIndex::from_address(va);
        debug_assert_ne!(pd, SELF_MAP_INDEX, "the self-map slot is not a page table");
        self.directory().set(pd, Pde::table(frame));
        self.table(pd).fill(Pte::user_only());
    }

    /// Map the page containing `va` to `frame` (present, writable, user).
    ///
    /// # Errors
    /// [`MapError::MissingTable`] if the directory slot is absent.
    pub fn map(&self, va: VirtualAddress, frame: FrameNumber) -> Result<(), MapError> {
        let (pd, pt) = split_indices(va);
        if !self.directory().get(pd).present() {
            return Err(MapError::MissingTable(va));
        }
        self.table(pd).set(pt, Pte::page(frame));
        Ok(())
    }

    /// Clear the present bit of the page containing `va` and return the
    /// frame it mapped. `writable` and `user` are kept.
    ///
    /// The caller is responsible for flushing the stale translation.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if either level is not present.
    pub fn unmap(&self, va: VirtualAddress) -> Result<FrameNumber, MapError> {
        let (pd, pt) = split_indices(va);
        if !self.directory().get(pd).present() {
            return Err(MapError::NotMapped(va));
        }
        let table = self.table(pd);
        let entry = table.get(pt);
        let frame = entry.page_frame().ok_or(MapError::NotMapped(va))?;
        table.set(
            pt,
            Pte::new()
                .with_writable(entry.writable())
                .with_user(entry.user()),
        );
        Ok(frame)
    }

    /// Translate `va` through the loaded directory.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let frame = self.entry(va).ok()?.page_frame()?;
        Some(frame.join(va.offset()))
    }
}
