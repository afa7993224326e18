//! # Memory Page Table

pub mod bits;
pub mod pd;
pub mod pt;

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::VirtualAddress;

/// Number of 32-bit entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Split a linear address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from_address(va), TableIndex::from_address(va))
}
