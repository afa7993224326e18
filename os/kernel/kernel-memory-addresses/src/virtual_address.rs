use crate::{MemoryAddress, PageOffset, VirtualPage};
use core::fmt;
use core::ptr::NonNull;

/// Virtual (linear) memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// Once paging is enabled every load and store goes through the two-level
/// translation; before that, linear and physical addresses coincide.
///
/// ### Semantics
/// - The top 10 bits select the page-directory entry, the next 10 bits the
///   page-table entry, and the low 12 bits the byte inside the page.
/// - Use [`VirtualAddress::page`] / [`VirtualAddress::offset`] /
///   [`VirtualAddress::split`] for the page base and in-page offset.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x4000_2468);
/// let (vp, off) = va.split();
/// assert_eq!(vp.base().as_u32(), 0x4000_2000);
/// assert_eq!(vp.join(off), va);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    /// Address of a pointer in the current address space.
    ///
    /// Only meaningful on the 32-bit target; the upper half of a host pointer
    /// is discarded.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_nonnull<T>(ptr: NonNull<T>) -> Self {
        Self::new(ptr.as_ptr() as usize as u32)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    /// The page that contains this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::containing_address(self)
    }

    #[inline]
    #[must_use]
    pub const fn offset(self) -> PageOffset {
        self.0.offset()
    }

    #[inline]
    #[must_use]
    pub const fn split(self) -> (VirtualPage, PageOffset) {
        (self.page(), self.offset())
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0.is_page_aligned()
    }

    /// Add `rhs` bytes, returning `None` on a wrap past 4 GiB.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<VirtualPage> for VirtualAddress {
    fn from(value: VirtualPage) -> Self {
        value.base()
    }
}
