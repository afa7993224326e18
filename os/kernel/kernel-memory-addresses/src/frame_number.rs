use crate::{PAGE_SHIFT, PageOffset, PhysicalAddress};
use core::fmt;
use core::ops::{Add, Sub};

/// Index of a 4 KiB physical frame.
///
/// Frame `n` covers the physical bytes `n * 4096 .. (n + 1) * 4096`. The frame
/// pools hand out and take back frames by number; page-table entries store
/// the number in their upper 20 bits.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let f = FrameNumber::new(512);
/// assert_eq!(f.base(), PhysicalAddress::new(0x0020_0000));
/// assert_eq!(FrameNumber::containing(PhysicalAddress::new(0x0020_0FFF)), f);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    /// Largest representable frame number on a 32-bit physical bus.
    pub const MAX: Self = Self((1 << 20) - 1);

    #[inline]
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// The frame that contains `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// First physical byte of this frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> PhysicalAddress {
        PhysicalAddress::new((self.0 << PAGE_SHIFT) | off.as_u32())
    }

    /// Add `rhs` frames, returning `None` past [`FrameNumber::MAX`].
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(n) if n <= Self::MAX.0 => Some(Self(n)),
            _ => None,
        }
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for FrameNumber {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl Add<u32> for FrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub for FrameNumber {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
