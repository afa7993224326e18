use crate::{MemoryAddress, PAGE_SHIFT, PageOffset, VirtualAddress};
use core::fmt;

/// Base of a 4 KiB virtual page.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x2000_0FFF);
/// let vp = VirtualPage::containing_address(va);
/// assert_eq!(vp.base().as_u32(), 0x2000_0000);
/// assert_eq!(vp.number(), 0x20000);
/// assert_eq!(VirtualPage::try_from(va), Err(()));
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(MemoryAddress);

impl VirtualPage {
    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self(addr.0.align_down())
    }

    /// Page with the given page number (`address >> 12`).
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        debug_assert!(number < (1 << 20));
        Self(MemoryAddress::new(number << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    /// The page number (`address >> 12`).
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.as_u32() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> VirtualAddress {
        VirtualAddress::new(self.0.as_u32() | off.as_u32())
    }

    /// The page directly after this one, or `None` at the top of memory.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(crate::PAGE_SIZE) {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.0.as_u32())
    }
}

impl TryFrom<VirtualAddress> for VirtualPage {
    type Error = ();

    #[inline]
    fn try_from(va: VirtualAddress) -> Result<Self, ()> {
        if va.is_page_aligned() {
            Ok(va.page())
        } else {
            Err(())
        }
    }
}
