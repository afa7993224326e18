//! # Frame Pool Registry
//!
//! The kernel runs several [`ContFramePool`]s side by side (kernel frames,
//! process frames). [`FramePoolRegistry`] owns them and answers the one
//! question a single pool cannot: which pool a frame belongs to. That is what
//! [`release_frames`](FramePoolRegistry::release_frames) needs, since callers
//! only hand back the first frame of a sequence.

use crate::frame_alloc::{ContFramePool, FramePoolError};
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::PhysMapper;
use log::{debug, info, warn};

/// Upper bound on concurrently registered pools.
pub const MAX_FRAME_POOLS: usize = 8;

/// Index of a pool in its [`FramePoolRegistry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FramePoolId(usize);

impl FramePoolId {
    #[cfg(test)]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Fixed-capacity set of frame pools with disjoint frame ranges.
pub struct FramePoolRegistry<'m> {
    pools: [Option<ContFramePool<'m>>; MAX_FRAME_POOLS],
}

impl Default for FramePoolRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m> FramePoolRegistry<'m> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_FRAME_POOLS],
        }
    }

    /// Build a pool (see [`ContFramePool::new`]) and register it.
    ///
    /// # Errors
    /// - [`FramePoolError::OverlappingPool`] if a registered pool already
    ///   manages any of the frames; checked before the bitmap is touched.
    /// - [`FramePoolError::RegistryFull`].
    /// - Anything [`ContFramePool::new`] reports.
    pub fn create_pool<M: PhysMapper>(
        &mut self,
        mapper: &M,
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
    ) -> Result<FramePoolId, FramePoolError> {
        let end = base
            .checked_add(count)
            .ok_or(FramePoolError::OutOfRange(base))?;
        if self.overlaps(base, end) {
            return Err(FramePoolError::OverlappingPool { base, end });
        }
        let slot = self
            .pools
            .iter()
            .position(Option::is_none)
            .ok_or(FramePoolError::RegistryFull)?;

        let pool = ContFramePool::new(mapper, base, count, info_frame)?;
        info!(
            "Registered frame pool #{slot}: frames {base}..{end}, {} free",
            pool.free_frames()
        );
        self.pools[slot] = Some(pool);
        Ok(FramePoolId(slot))
    }

    /// Register a pool built by the caller.
    ///
    /// # Errors
    /// [`FramePoolError::OverlappingPool`] or [`FramePoolError::RegistryFull`].
    pub fn register(&mut self, pool: ContFramePool<'m>) -> Result<FramePoolId, FramePoolError> {
        let (base, end) = (pool.base_frame(), pool.end_frame());
        if self.overlaps(base, end) {
            return Err(FramePoolError::OverlappingPool { base, end });
        }
        let slot = self
            .pools
            .iter()
            .position(Option::is_none)
            .ok_or(FramePoolError::RegistryFull)?;
        self.pools[slot] = Some(pool);
        Ok(FramePoolId(slot))
    }

    fn overlaps(&self, base: FrameNumber, end: FrameNumber) -> bool {
        self.iter()
            .any(|(_, p)| base < p.end_frame() && p.base_frame() < end)
    }

    /// # Errors
    /// [`FramePoolError::UnknownPool`].
    pub fn get(&self, id: FramePoolId) -> Result<&ContFramePool<'m>, FramePoolError> {
        self.pools
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(FramePoolError::UnknownPool(id))
    }

    /// # Errors
    /// [`FramePoolError::UnknownPool`].
    pub fn get_mut(&mut self, id: FramePoolId) -> Result<&mut ContFramePool<'m>, FramePoolError> {
        self.pools
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(FramePoolError::UnknownPool(id))
    }

    /// Registered pools in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (FramePoolId, &ContFramePool<'m>)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (FramePoolId(i), p)))
    }

    /// The pool whose range contains `frame`.
    #[must_use]
    pub fn owner_of(&self, frame: FrameNumber) -> Option<FramePoolId> {
        self.iter()
            .find(|(_, p)| p.contains(frame))
            .map(|(id, _)| id)
    }

    /// Allocate `n` contiguous frames from pool `id`.
    ///
    /// # Errors
    /// [`FramePoolError::UnknownPool`] or whatever
    /// [`ContFramePool::get_frames`] reports.
    pub fn get_frames(&mut self, id: FramePoolId, n: u32) -> Result<FrameNumber, FramePoolError> {
        self.get_mut(id)?.get_frames(n)
    }

    /// Release the sequence headed by `first`, whichever pool owns it.
    ///
    /// Returns the number of frames freed.
    ///
    /// # Errors
    /// - [`FramePoolError::NoOwningPool`] if no pool manages `first`.
    /// - [`FramePoolError::NotHeadOfSequence`] or
    ///   [`FramePoolError::CorruptState`] from the owning pool; nothing
    ///   changes.
    pub fn release_frames(&mut self, first: FrameNumber) -> Result<u32, FramePoolError> {
        let id = self
            .owner_of(first)
            .ok_or(FramePoolError::NoOwningPool(first))?;
        match self.get_mut(id)?.release(first) {
            Ok(freed) => {
                debug!("Released {freed} frame(s) at {first} to pool #{}", id.0);
                Ok(freed)
            }
            Err(e) => {
                warn!("Cannot release frames at {first}: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with<'a>(bits: &'a mut [u8], other: &'a mut [u8]) -> FramePoolRegistry<'a> {
        let mut r = FramePoolRegistry::new();
        r.register(ContFramePool::from_bitmap(FrameNumber::new(16), 16, bits).unwrap())
            .unwrap();
        r.register(ContFramePool::from_bitmap(FrameNumber::new(64), 32, other).unwrap())
            .unwrap();
        r
    }

    #[test]
    fn release_finds_owner() {
        let (mut a, mut b) = ([0u8; 4], [0u8; 8]);
        let mut r = registry_with(&mut a, &mut b);
        let second = r.owner_of(FrameNumber::new(64)).unwrap();

        let run = r.get_frames(second, 5).unwrap();
        assert_eq!(run, FrameNumber::new(64));
        assert_eq!(r.release_frames(run), Ok(5));
        assert_eq!(r.get(second).unwrap().free_frames(), 32);
    }

    #[test]
    fn release_without_owner() {
        let (mut a, mut b) = ([0u8; 4], [0u8; 8]);
        let mut r = registry_with(&mut a, &mut b);
        assert_eq!(
            r.release_frames(FrameNumber::new(40)),
            Err(FramePoolError::NoOwningPool(FrameNumber::new(40)))
        );
    }

    #[test]
    fn overlapping_pools_are_rejected() {
        let (mut a, mut b, mut c) = ([0u8; 4], [0u8; 8], [0u8; 2]);
        let mut r = registry_with(&mut a, &mut b);
        let clash = ContFramePool::from_bitmap(FrameNumber::new(88), 8, &mut c).unwrap();
        assert_eq!(
            r.register(clash).err(),
            Some(FramePoolError::OverlappingPool {
                base: FrameNumber::new(88),
                end: FrameNumber::new(96)
            })
        );
    }

    #[test]
    fn unknown_id() {
        let r = FramePoolRegistry::new();
        assert_eq!(
            r.get(FramePoolId(3)).err().map(|e| e.to_string()),
            Some("no frame pool with id FramePoolId(3)".into())
        );
    }
}
