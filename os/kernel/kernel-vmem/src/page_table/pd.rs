//! # i386 Page Directory (PD)
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 [`Pde`]s.
//!
//! Slot 1023 is reserved for the recursive self-map; see [`crate::self_map`].

use crate::page_table::ENTRIES_PER_TABLE;
use crate::page_table::bits::Pde;
use kernel_memory_addresses::VirtualAddress;

/// Index into the Page Directory (derived from VA bits `[31:22]`).
///
/// Strongly typed to avoid mixing with table indices. Range is `0..1024`
/// (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

impl DirectoryIndex {
    /// Build an index from a linear address (extracts bits `[31:22]`).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_address(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> 22) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 1024);
        Self(v)
    }

    /// Return the index as `usize` for table access.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First linear address covered by this directory slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [Pde; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageDirectory>() == 4096);

impl PageDirectory {
    /// Create a fully zeroed directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [Pde::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Read the entry at `i`.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> Pde {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: Pde) {
        self.entries[i.as_usize()] = e;
    }

    /// Overwrite every entry with `e`.
    #[inline]
    pub fn fill(&mut self, e: Pde) {
        self.entries.fill(e);
    }

    /// Derive the directory index from a virtual address.
    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> DirectoryIndex {
        DirectoryIndex::from_address(va)
    }
}
