//! # Recursive Self-Map Encoding
//!
//! Directory slot [`SELF_MAP_INDEX`] points at the directory's own frame.
//! Pure address arithmetic for reaching the loaded directory and its tables
//! through that slot once paging is on.

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use crate::page_table::split_indices;
use kernel_info::memory::SELF_MAP_BASE;
use kernel_memory_addresses::VirtualAddress;

/// The directory slot that maps the directory itself.
pub const SELF_MAP_INDEX: DirectoryIndex = DirectoryIndex::new(1023);

/// Slot 1023 walked twice: the directory seen as a page.
pub const DIRECTORY_WINDOW: VirtualAddress = VirtualAddress::new(0xFFFF_F000);

/// Linear address of the loaded page directory.
#[inline]
#[must_use]
pub const fn directory_window() -> VirtualAddress {
    DIRECTORY_WINDOW
}

/// Linear address of the page table referenced by directory slot `pd`.
///
/// ```rust
/// # use kernel_vmem::self_map::table_window;
/// # use kernel_vmem::DirectoryIndex;
/// assert_eq!(table_window(DirectoryIndex::new(0)).as_u32(), 0xFFC0_0000);
/// assert_eq!(table_window(DirectoryIndex::new(0x80)).as_u32(), 0xFFC8_0000);
/// assert_eq!(table_window(DirectoryIndex::new(1023)).as_u32(), 0xFFFF_F000);
/// ```
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn table_window(pd: DirectoryIndex) -> VirtualAddress {
    VirtualAddress::new(SELF_MAP_BASE | ((pd.as_usize() as u32) << 12))
}

/// Linear address of the PTE that maps `va` in the loaded directory.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn entry_address(va: VirtualAddress) -> VirtualAddress {
    let (pd, pt): (DirectoryIndex, TableIndex) = split_indices(va);
    VirtualAddress::new(table_window(pd).as_u32() | ((pt.as_usize() as u32) << 2))
}

/// Whether `va` lies in the 4 MiB window occupied by the self-map.
#[inline]
#[must_use]
pub const fn is_self_map(va: VirtualAddress) -> bool {
    va.as_u32() >= SELF_MAP_BASE
}
