use crate::{MemoryAddress, PAGE_SIZE};
use core::fmt;

/// The offset within a 4 KiB page (`0..4096`).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset(u32);

impl PageOffset {
    /// Create from a raw value, asserting it is `< PAGE_SIZE` in debug.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value < PAGE_SIZE, "offset must be < page size");
        Self(value & (PAGE_SIZE - 1))
    }

    /// Construct from a full address's offset bits.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self(addr.as_u32() & (PAGE_SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageOffset({:#X})", self.0)
    }
}
