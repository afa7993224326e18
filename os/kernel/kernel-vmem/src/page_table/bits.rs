//! # i386 Paging Entry Layouts
//!
//! Bit-exact models of the two 32-bit entry formats of non-PAE paging.
//! Both share the low permission bits and keep the frame number in bits
//! 12..31.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress};

/// **PDE**: pointer to a page table (`PS` **must be 0**).
///
/// When `present` is clear the CPU ignores every other bit; the kernel
/// still keeps `writable` set on unused slots so that a later install only
/// has to flip `present` and the frame.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pde {
    /// **Present** (bit 0): valid entry if set.
    pub present: bool,

    /// **Writable** (bit 1): write permission for the whole 4 MiB.
    pub writable: bool,

    /// **User/Supervisor** (bit 2): allow user-mode access if set.
    pub user: bool,

    /// **Page Write-Through** (PWT, bit 3).
    pub write_through: bool,

    /// **Page Cache Disable** (PCD, bit 4).
    pub cache_disable: bool,

    /// **Accessed** (A, bit 5): set by the CPU on first access via this entry.
    pub accessed: bool,

    /// (bit 6): **ignored** for entries that reference a page table.
    #[bits(1)]
    __d_ignored: u8,

    /// **Page Size** (bit 7): **must be 0**; 4 MiB pages are not used.
    #[bits(1)]
    __ps_must_be_0: u8,

    /// **Global** (bit 8): **ignored** for entries that reference a page table.
    #[bits(1)]
    __g_ignored: u8,

    /// **OS-available** (bits 9..11): not interpreted by hardware.
    #[bits(3)]
    pub os_available: u8,

    /// **Page table frame** (bits 12..31).
    #[bits(20)]
    frame_31_12: u32,
}

impl Pde {
    /// Entry for a present, supervisor-only, writable page table.
    #[inline]
    #[must_use]
    pub const fn table(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_frame_31_12(frame.as_u32())
    }

    /// A not-present slot with only `writable` set.
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self::new().with_writable(true)
    }

    /// The referenced page-table frame.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.frame_31_12())
    }

    /// Set the page-table frame.
    #[inline]
    pub const fn set_frame(&mut self, frame: FrameNumber) {
        self.set_frame_31_12(frame.as_u32());
    }

    /// Get the page-table base address (4 KiB-aligned).
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.frame().base()
    }

    /// The page-table frame, if present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<FrameNumber> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }
}

/// **PTE**: maps a single 4 KiB page.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pte {
    /// **Present** (bit 0): the page is mapped.
    ///
    /// A clear bit makes every access fault with error code bit 0 clear,
    /// which is what drives demand paging.
    pub present: bool,

    /// **Writable** (bit 1).
    pub writable: bool,

    /// **User/Supervisor** (bit 2).
    pub user: bool,

    /// **Page Write-Through** (PWT, bit 3).
    pub write_through: bool,

    /// **Page Cache Disable** (PCD, bit 4).
    pub cache_disable: bool,

    /// **Accessed** (A, bit 5).
    pub accessed: bool,

    /// **Dirty** (D, bit 6): set by the CPU on the first write.
    pub dirty: bool,

    /// **PAT** (bit 7): page attribute table index bit.
    pub pat: bool,

    /// **Global** (G, bit 8): survives CR3 reloads when CR4.PGE is set.
    pub global: bool,

    /// **OS-available** (bits 9..11).
    #[bits(3)]
    pub os_available: u8,

    /// **Page frame** (bits 12..31).
    #[bits(20)]
    frame_31_12: u32,
}

impl Pte {
    /// A present, user-accessible, writable mapping of `frame`.
    #[inline]
    #[must_use]
    pub const fn page(frame: FrameNumber) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_frame_31_12(frame.as_u32())
    }

    /// A not-present slot with only `writable` set.
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self::new().with_writable(true)
    }

    /// A not-present slot with only `user` set; the initial state of a page
    /// table installed on demand.
    #[inline]
    #[must_use]
    pub const fn user_only() -> Self {
        Self::new().with_user(true)
    }

    /// The mapped frame.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.frame_31_12())
    }

    /// Set the mapped frame.
    #[inline]
    pub const fn set_frame(&mut self, frame: FrameNumber) {
        self.set_frame_31_12(frame.as_u32());
    }

    /// Get the page base address (4 KiB-aligned).
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.frame().base()
    }

    /// The mapped frame, if present.
    #[inline]
    #[must_use]
    pub const fn page_frame(self) -> Option<FrameNumber> {
        if self.present() {
            Some(self.frame())
        } else {
            None
        }
    }
}
