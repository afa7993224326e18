//! # Contiguous Frame Pool
//!
//! A [`ContFramePool`] manages a fixed run of physical frames and hands out
//! *contiguous* sequences of them. Its bookkeeping is a bitmap with two bits
//! per frame:
//!
//! | Bits | State |
//! |:-----|:------|
//! | `00` | [`FrameState::Free`] |
//! | `01` | [`FrameState::Used`] (interior of a sequence) |
//! | `11` | [`FrameState::HeadOfSequence`] (first frame of a sequence) |
//! | `10` | never written; reported as [`FramePoolError::CorruptState`] |
//!
//! Frame `i` of the pool occupies bits `2*(i % 4) .. 2*(i % 4) + 2` of byte
//! `i / 4`. A sequence is therefore delimited by its head and the first frame
//! after it that is not [`Used`](FrameState::Used); no length is stored.
//!
//! The bitmap lives in physical memory, either in a separate *info frame* or
//! in the first frame of the pool itself. One info frame describes up to
//! [`MAX_POOL_FRAMES`] frames.

use crate::frame_pools::FramePoolId;
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{debug, warn};

/// Frames a single info frame can describe at two bits each.
pub const MAX_POOL_FRAMES: u32 = FRAME_SIZE * 4;

/// Allocation state of one frame.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameState {
    Free = 0b00,
    Used = 0b01,
    HeadOfSequence = 0b11,
}

impl FrameState {
    const MASK: u8 = 0b11;

    #[inline]
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits & Self::MASK {
            0b00 => Some(Self::Free),
            0b01 => Some(Self::Used),
            0b11 => Some(Self::HeadOfSequence),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FramePoolError {
    #[error("frame count {0} is not a non-zero multiple of 8 up to 16384")]
    InvalidFrameCount(u32),
    #[error("no run of {requested} free frame(s) ({free} free in total)")]
    Exhausted { requested: u32, free: u32 },
    #[error("frame {0} is outside the pool")]
    OutOfRange(FrameNumber),
    #[error("frame {0} is already allocated")]
    AlreadyAllocated(FrameNumber),
    #[error("frame {0} is not the head of an allocated sequence")]
    NotHeadOfSequence(FrameNumber),
    #[error("no frame pool owns frame {0}")]
    NoOwningPool(FrameNumber),
    #[error("frame {0} carries the unused state pattern 0b10")]
    CorruptState(FrameNumber),
    #[error("the frame pool registry is full")]
    RegistryFull,
    #[error("frames {base}..{end} overlap a registered pool")]
    OverlappingPool { base: FrameNumber, end: FrameNumber },
    #[error("no frame pool with id {0:?}")]
    UnknownPool(FramePoolId),
    #[error("bitmap of {len} byte(s) is too small, {needed} needed")]
    BitmapTooSmall { needed: usize, len: usize },
}

/// Frame totals by state, as counted from the bitmap.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FrameCensus {
    pub free: u32,
    pub used: u32,
    pub heads: u32,
    pub corrupt: u32,
}

/// Allocator for contiguous runs of frames in `[base, base + count)`.
pub struct ContFramePool<'m> {
    base: FrameNumber,
    count: u32,
    free: u32,
    info_frame: FrameNumber,
    bitmap: &'m mut [u8],
}

impl<'m> ContFramePool<'m> {
    /// Set up a pool over `count` frames starting at `base`.
    ///
    /// With `info_frame == None` the bitmap is kept in `base` itself, which
    /// is marked [`Used`](FrameState::Used) and is never handed out.
    /// Otherwise the bitmap lives in `info_frame`; the caller must already
    /// own that frame (typically from another pool, sized by
    /// [`needed_info_frames`](Self::needed_info_frames)).
    ///
    /// The info frame must be reachable through `mapper` for as long as the
    /// pool lives and must not be used for anything else.
    ///
    /// # Errors
    /// - [`FramePoolError::InvalidFrameCount`] unless `count` is a non-zero
    ///   multiple of 8 no larger than [`MAX_POOL_FRAMES`].
    /// - [`FramePoolError::OutOfRange`] if the pool would run past the
    ///   largest frame number.
    pub fn new<M: PhysMapper>(
        mapper: &M,
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
    ) -> Result<Self, FramePoolError> {
        Self::check_geometry(base, count)?;

        let info = info_frame.unwrap_or(base);
        let page: &'m mut [u8; FRAME_SIZE as usize] =
            unsafe { mapper.phys_to_mut::<[u8; FRAME_SIZE as usize]>(info.base()) };
        let bitmap = &mut page[..(count / 4) as usize];

        let mut pool = Self::from_bitmap(base, count, bitmap)?;
        pool.info_frame = info;
        if info_frame.is_none() {
            pool.set_state(0, FrameState::Used);
            pool.free -= 1;
        }

        debug!(
            "Frame pool {base}..{} ready: {} free, bitmap in frame {info}",
            pool.end_frame(),
            pool.free
        );
        Ok(pool)
    }

    /// Set up a pool whose bitmap is `bitmap`, which must hold at least
    /// `count / 4` bytes. Every frame starts out free.
    ///
    /// # Errors
    /// - Same as [`new`](Self::new).
    /// - [`FramePoolError::BitmapTooSmall`] if `bitmap` is shorter than
    ///   `count / 4` bytes.
    pub fn from_bitmap(
        base: FrameNumber,
        count: u32,
        bitmap: &'m mut [u8],
    ) -> Result<Self, FramePoolError> {
        Self::check_geometry(base, count)?;
        let (needed, len) = ((count / 4) as usize, bitmap.len());
        let bitmap = bitmap
            .get_mut(..needed)
            .ok_or(FramePoolError::BitmapTooSmall { needed, len })?;
        bitmap.fill(0);
        Ok(Self {
            base,
            count,
            free: count,
            info_frame: base,
            bitmap,
        })
    }

    fn check_geometry(base: FrameNumber, count: u32) -> Result<(), FramePoolError> {
        if count == 0 || !count.is_multiple_of(8) || count > MAX_POOL_FRAMES {
            return Err(FramePoolError::InvalidFrameCount(count));
        }
        match base.checked_add(count - 1) {
            Some(_) => Ok(()),
            None => Err(FramePoolError::OutOfRange(base)),
        }
    }

    /// Info frames needed to describe a pool of `count` frames.
    ///
    /// ```rust
    /// # use kernel_alloc::frame_alloc::ContFramePool;
    /// assert_eq!(ContFramePool::needed_info_frames(16384), 1);
    /// assert_eq!(ContFramePool::needed_info_frames(16385), 2);
    /// ```
    #[inline]
    #[must_use]
    pub const fn needed_info_frames(count: u32) -> u32 {
        count.div_ceil(MAX_POOL_FRAMES)
    }

    #[inline]
    #[must_use]
    pub const fn base_frame(&self) -> FrameNumber {
        self.base
    }

    /// First frame past the pool.
    #[inline]
    #[must_use]
    pub const fn end_frame(&self) -> FrameNumber {
        FrameNumber::new(self.base.as_u32() + self.count)
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.free
    }

    /// Frame that holds the bitmap.
    #[inline]
    #[must_use]
    pub const fn info_frame(&self) -> FrameNumber {
        self.info_frame
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.base.as_u32() && frame.as_u32() < self.end_frame().as_u32()
    }

    #[inline]
    fn raw(&self, index: u32) -> u8 {
        let shift = (index % 4) * 2;
        (self.bitmap[(index / 4) as usize] >> shift) & FrameState::MASK
    }

    /// Clear both bits, then set the new pattern.
    #[inline]
    fn set_state(&mut self, index: u32, state: FrameState) {
        let shift = (index % 4) * 2;
        let byte = &mut self.bitmap[(index / 4) as usize];
        *byte = (*byte & !(FrameState::MASK << shift)) | ((state as u8) << shift);
    }

    #[inline]
    fn is_free(&self, index: u32) -> bool {
        self.raw(index) == FrameState::Free as u8
    }

    fn index_of(&self, frame: FrameNumber) -> Result<u32, FramePoolError> {
        if self.contains(frame) {
            Ok(frame - self.base)
        } else {
            Err(FramePoolError::OutOfRange(frame))
        }
    }

    /// State of `frame`.
    ///
    /// # Errors
    /// - [`FramePoolError::OutOfRange`] if the pool does not manage `frame`.
    /// - [`FramePoolError::CorruptState`] for the `10` pattern.
    pub fn state_of(&self, frame: FrameNumber) -> Result<FrameState, FramePoolError> {
        let index = self.index_of(frame)?;
        FrameState::from_bits(self.raw(index)).ok_or(FramePoolError::CorruptState(frame))
    }

    /// Length of the sequence headed by `head`, or `None` if `head` is not
    /// a head of sequence.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn run_length(&self, head: FrameNumber) -> Option<u32> {
        let index = self.index_of(head).ok()?;
        if self.raw(index) != FrameState::HeadOfSequence as u8 {
            return None;
        }
        let tail = (index + 1..self.count)
            .take_while(|&i| self.raw(i) == FrameState::Used as u8)
            .count();
        Some(1 + tail as u32)
    }

    /// Count every frame by its bitmap state.
    #[must_use]
    pub fn census(&self) -> FrameCensus {
        let mut census = FrameCensus::default();
        for i in 0..self.count {
            match FrameState::from_bits(self.raw(i)) {
                Some(FrameState::Free) => census.free += 1,
                Some(FrameState::Used) => census.used += 1,
                Some(FrameState::HeadOfSequence) => census.heads += 1,
                None => census.corrupt += 1,
            }
        }
        census
    }

    /// Allocate `n` contiguous frames, first fit from the lowest frame.
    ///
    /// The first frame becomes the head of the sequence, the rest are
    /// marked used.
    ///
    /// # Errors
    /// - [`FramePoolError::InvalidFrameCount`] for `n == 0`.
    /// - [`FramePoolError::Exhausted`] if `n` exceeds the free count or no
    ///   run of `n` free frames exists. The pool is left unchanged.
    pub fn get_frames(&mut self, n: u32) -> Result<FrameNumber, FramePoolError> {
        if n == 0 {
            return Err(FramePoolError::InvalidFrameCount(0));
        }
        let exhausted = FramePoolError::Exhausted {
            requested: n,
            free: self.free,
        };
        if n > self.free {
            return Err(exhausted);
        }

        let mut start = 0;
        while start + n <= self.count {
            match (start..start + n).find(|&i| !self.is_free(i)) {
                Some(taken) => start = taken + 1,
                None => {
                    self.set_state(start, FrameState::HeadOfSequence);
                    for i in start + 1..start + n {
                        self.set_state(i, FrameState::Used);
                    }
                    self.free -= n;
                    return Ok(self.base + start);
                }
            }
        }
        Err(exhausted)
    }

    /// Take `[first, first + n)` out of circulation as a single sequence,
    /// e.g. a hole in physical memory.
    ///
    /// Every frame is checked before any state changes.
    ///
    /// # Errors
    /// - [`FramePoolError::OutOfRange`] if any frame is outside the pool.
    /// - [`FramePoolError::AlreadyAllocated`] if any frame is not free.
    pub fn mark_inaccessible(&mut self, first: FrameNumber, n: u32) -> Result<(), FramePoolError> {
        if n == 0 {
            return Ok(());
        }
        let start = self.index_of(first)?;
        let last = first
            .checked_add(n - 1)
            .ok_or(FramePoolError::OutOfRange(first))?;
        self.index_of(last)?;

        if let Some(taken) = (start..start + n).find(|&i| !self.is_free(i)) {
            return Err(FramePoolError::AlreadyAllocated(self.base + taken));
        }

        self.set_state(start, FrameState::HeadOfSequence);
        for i in start + 1..start + n {
            self.set_state(i, FrameState::Used);
        }
        self.free -= n;
        debug!("Frames {first}..{} marked inaccessible", first + n);
        Ok(())
    }

    /// Free the sequence headed by `head`: the head itself and every
    /// following [`Used`](FrameState::Used) frame up to the first free
    /// frame, the next head, or the end of the pool.
    ///
    /// Returns the number of frames freed.
    ///
    /// # Errors
    /// - [`FramePoolError::OutOfRange`] if the pool does not manage `head`.
    /// - [`FramePoolError::CorruptState`] for the `10` pattern.
    /// - [`FramePoolError::NotHeadOfSequence`] otherwise; nothing changes.
    pub fn release(&mut self, head: FrameNumber) -> Result<u32, FramePoolError> {
        match self.state_of(head)? {
            FrameState::HeadOfSequence => {}
            _ => return Err(FramePoolError::NotHeadOfSequence(head)),
        }

        let start = head - self.base;
        self.set_state(start, FrameState::Free);
        let mut freed = 1;
        let mut i = start + 1;
        while i < self.count && self.raw(i) == FrameState::Used as u8 {
            self.set_state(i, FrameState::Free);
            freed += 1;
            i += 1;
        }
        self.free += freed;
        Ok(freed)
    }
}

/// Single frames for page directories and tables.
impl FrameAlloc for ContFramePool<'_> {
    fn alloc_frame(&mut self) -> Option<FrameNumber> {
        self.get_frames(1).ok()
    }

    fn free_frame(&mut self, frame: FrameNumber) {
        if let Err(e) = self.release(frame) {
            warn!("Could not return frame {frame}: {e}");
        }
    }
}
