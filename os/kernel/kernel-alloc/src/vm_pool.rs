//! # Virtual Memory Pools
//!
//! A [`VmPool`] reserves a range of virtual addresses and carves it into
//! page-rounded regions. Reserving a region maps nothing; its pages are
//! backed lazily by the page-fault handler, which asks the pools of the
//! loaded address space whether the faulting address lies in a live region
//! ([`VmPoolRegistry::claimant`]).
//!
//! Regions are kept sorted by start address in a fixed table of
//! [`MAX_REGIONS`] entries, so no pool ever needs heap memory or
//! faults on its own bookkeeping.

use crate::frame_pools::FramePoolId;
use kernel_info::memory::SELF_MAP_BASE;
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, VirtualAddress, page_align_up};
use log::{debug, info};

/// Upper bound on concurrently registered VM pools.
pub const MAX_VM_POOLS: usize = 8;

/// Regions one pool can track; one page worth of region records.
pub const MAX_REGIONS: usize = (PAGE_SIZE as usize) / size_of::<Region>();

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("cannot allocate a zero-sized region")]
    ZeroSize,
    #[error("no gap of {0:#x} bytes left in the pool")]
    OutOfSpace(u32),
    #[error("the region table is full")]
    RegionTableFull,
    #[error("no region starts at {0}")]
    UnknownRegion(VirtualAddress),
    #[error("pool base {0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("pool size {0:#x} is not a non-zero multiple of 4 KiB")]
    InvalidSize(u32),
    #[error("pool {base}+{size:#x} reaches into the shared region or the self-map window")]
    ReservedRange { base: VirtualAddress, size: u32 },
    #[error("pool {base}+{size:#x} overlaps a registered pool")]
    Overlapping { base: VirtualAddress, size: u32 },
    #[error("the VM pool registry is full")]
    RegistryFull,
    #[error("no VM pool with id {0:?}")]
    UnknownPool(VmPoolId),
    #[error("the pool's page directory is not loaded")]
    NotLoaded,
}

/// A reserved, page-rounded span `[start, start + size)`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Region {
    start: VirtualAddress,
    size: u32,
}

impl Region {
    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Size in bytes, a multiple of the page size.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.size / PAGE_SIZE
    }

    #[inline]
    const fn end(&self) -> u32 {
        self.start.as_u32() + self.size
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.start.as_u32() && va.as_u32() < self.end()
    }
}

/// A range of virtual memory handed out region by region.
pub struct VmPool {
    base: VirtualAddress,
    size: u32,
    frame_pool: FramePoolId,
    directory: FrameNumber,
    regions: [Region; MAX_REGIONS],
    len: usize,
}

impl VmPool {
    /// A pool over `[base, base + size)` whose pages are backed from
    /// `frame_pool` in the address space rooted at `directory`.
    ///
    /// # Errors
    /// - [`VmPoolError::Unaligned`], [`VmPoolError::InvalidSize`].
    /// - [`VmPoolError::ReservedRange`] if the range wraps or reaches the
    ///   self-map window.
    pub const fn new(
        base: VirtualAddress,
        size: u32,
        frame_pool: FramePoolId,
        directory: FrameNumber,
    ) -> Result<Self, VmPoolError> {
        if !base.is_page_aligned() {
            return Err(VmPoolError::Unaligned(base));
        }
        if size == 0 || !size.is_multiple_of(PAGE_SIZE) {
            return Err(VmPoolError::InvalidSize(size));
        }
        match base.as_u32().checked_add(size) {
            Some(end) if end <= SELF_MAP_BASE => {}
            _ => return Err(VmPoolError::ReservedRange { base, size }),
        }
        Ok(Self {
            base,
            size,
            frame_pool,
            directory,
            regions: [Region {
                start: VirtualAddress::zero(),
                size: 0,
            }; MAX_REGIONS],
            len: 0,
        })
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// First address past the pool.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base.as_u32() + self.size
    }

    /// Pool the fault handler takes this pool's data frames from.
    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> FramePoolId {
        self.frame_pool
    }

    /// Directory of the address space the pool lives in.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> FrameNumber {
        self.directory
    }

    /// Live regions, sorted by start address.
    #[inline]
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions[..self.len]
    }

    #[inline]
    #[must_use]
    pub const fn region_count(&self) -> usize {
        self.len
    }

    /// Bytes reserved by live regions.
    #[must_use]
    pub fn allocated_bytes(&self) -> u32 {
        self.regions().iter().map(Region::size).sum()
    }

    /// Whether `va` lies inside the pool's range, allocated or not.
    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.base.as_u32() && va.as_u32() < self.end()
    }

    /// Whether `va` lies inside a live region.
    #[must_use]
    pub fn is_legitimate(&self, va: VirtualAddress) -> bool {
        if !self.contains(va) {
            return false;
        }
        // last region starting at or below va
        let i = self.regions().partition_point(|r| r.start <= va);
        i > 0 && self.regions[i - 1].contains(va)
    }

    /// Reserve `bytes`, rounded up to whole pages, at the lowest gap that
    /// fits. Nothing is mapped.
    ///
    /// # Errors
    /// - [`VmPoolError::ZeroSize`].
    /// - [`VmPoolError::RegionTableFull`].
    /// - [`VmPoolError::OutOfSpace`] if no gap is large enough.
    pub fn allocate(&mut self, bytes: u32) -> Result<VirtualAddress, VmPoolError> {
        if bytes == 0 {
            return Err(VmPoolError::ZeroSize);
        }
        let size = page_align_up(bytes).ok_or(VmPoolError::OutOfSpace(bytes))?;
        if self.len == MAX_REGIONS {
            return Err(VmPoolError::RegionTableFull);
        }

        let mut cursor = self.base.as_u32();
        let mut slot = self.len;
        for (i, r) in self.regions().iter().enumerate() {
            if r.start.as_u32() - cursor >= size {
                slot = i;
                break;
            }
            cursor = r.end();
        }
        if slot == self.len && self.end() - cursor < size {
            return Err(VmPoolError::OutOfSpace(size));
        }

        self.regions.copy_within(slot..self.len, slot + 1);
        let start = VirtualAddress::new(cursor);
        self.regions[slot] = Region { start, size };
        self.len += 1;
        debug!("Reserved {start}+{size:#x} in VM pool at {}", self.base);
        Ok(start)
    }

    /// Drop the region starting at `start` and return it. Unmapping its
    /// pages is up to the caller.
    ///
    /// # Errors
    /// [`VmPoolError::UnknownRegion`] if no region starts at `start`.
    pub fn release(&mut self, start: VirtualAddress) -> Result<Region, VmPoolError> {
        let i = self
            .regions()
            .binary_search_by_key(&start, |r| r.start)
            .map_err(|_| VmPoolError::UnknownRegion(start))?;
        let region = self.regions[i];
        self.regions.copy_within(i + 1..self.len, i);
        self.len -= 1;
        debug!(
            "Released {}+{:#x} from VM pool at {}",
            region.start, region.size, self.base
        );
        Ok(region)
    }
}

/// Index of a pool in its [`VmPoolRegistry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VmPoolId(usize);

impl VmPoolId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Append-only list of VM pools, consulted on every page fault.
pub struct VmPoolRegistry {
    pools: [Option<VmPool>; MAX_VM_POOLS],
    len: usize,
}

impl Default for VmPoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VmPoolRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_VM_POOLS],
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `pool`.
    ///
    /// # Errors
    /// [`VmPoolError::Overlapping`] or [`VmPoolError::RegistryFull`].
    pub fn register(&mut self, pool: VmPool) -> Result<VmPoolId, VmPoolError> {
        let (base, size) = (pool.base(), pool.size());
        if self
            .iter()
            .any(|(_, p)| base.as_u32() < p.end() && p.base().as_u32() < pool.end())
        {
            return Err(VmPoolError::Overlapping { base, size });
        }
        if self.len == MAX_VM_POOLS {
            return Err(VmPoolError::RegistryFull);
        }
        let id = VmPoolId(self.len);
        self.pools[self.len] = Some(pool);
        self.len += 1;
        info!("Registered VM pool #{}: {base}+{size:#x}", id.0);
        Ok(id)
    }

    /// # Errors
    /// [`VmPoolError::UnknownPool`].
    pub fn get(&self, id: VmPoolId) -> Result<&VmPool, VmPoolError> {
        self.pools
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(VmPoolError::UnknownPool(id))
    }

    /// # Errors
    /// [`VmPoolError::UnknownPool`].
    pub fn get_mut(&mut self, id: VmPoolId) -> Result<&mut VmPool, VmPoolError> {
        self.pools
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VmPoolError::UnknownPool(id))
    }

    /// Pools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (VmPoolId, &VmPool)> {
        self.pools[..self.len]
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (VmPoolId(i), p)))
    }

    /// The pool of address space `directory` with a live region at `va`.
    ///
    /// Pools of other address spaces never claim an address, even if one of
    /// their regions covers it.
    #[must_use]
    pub fn claimant(
        &self,
        directory: FrameNumber,
        va: VirtualAddress,
    ) -> Option<(VmPoolId, &VmPool)> {
        self.iter()
            .find(|(_, p)| p.directory() == directory && p.is_legitimate(va))
    }

    /// Whether a pool of address space `directory` has a live region at `va`.
    #[must_use]
    pub fn is_legitimate_in(&self, directory: FrameNumber, va: VirtualAddress) -> bool {
        self.claimant(directory, va).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x2000_0000;

    fn pool(pages: u32) -> VmPool {
        VmPool::new(
            VirtualAddress::new(BASE),
            pages * PAGE_SIZE,
            FramePoolId::from_index(0),
            FrameNumber::new(1),
        )
        .unwrap()
    }

    #[test]
    fn regions_are_page_rounded_and_first_fit() {
        let mut p = pool(16);
        let a = p.allocate(1).unwrap();
        let b = p.allocate(PAGE_SIZE + 1).unwrap();
        let c = p.allocate(PAGE_SIZE).unwrap();
        assert_eq!(a.as_u32(), BASE);
        assert_eq!(b.as_u32(), BASE + PAGE_SIZE);
        assert_eq!(c.as_u32(), BASE + 3 * PAGE_SIZE);
        assert_eq!(p.allocated_bytes(), 4 * PAGE_SIZE);

        p.release(b).unwrap();
        // a one-page request fills the bottom of the gap b left
        assert_eq!(p.allocate(10).unwrap(), b);
        assert_eq!(p.regions().len(), 3);
        assert!(p.regions().is_sorted_by_key(Region::start));
    }

    #[test]
    fn legitimacy_follows_regions() {
        let mut p = pool(16);
        let a = p.allocate(2 * PAGE_SIZE).unwrap();
        let inside = VirtualAddress::new(a.as_u32() + PAGE_SIZE + 7);
        let past = VirtualAddress::new(a.as_u32() + 2 * PAGE_SIZE);

        assert!(p.is_legitimate(a));
        assert!(p.is_legitimate(inside));
        assert!(!p.is_legitimate(past));
        assert!(p.contains(past));
        assert!(!p.is_legitimate(VirtualAddress::new(BASE - 1)));

        p.release(a).unwrap();
        assert!(!p.is_legitimate(inside));
    }

    #[test]
    fn exhaustion_and_bad_release() {
        let mut p = pool(4);
        assert_eq!(p.allocate(0), Err(VmPoolError::ZeroSize));
        p.allocate(3 * PAGE_SIZE).unwrap();
        assert_eq!(
            p.allocate(2 * PAGE_SIZE),
            Err(VmPoolError::OutOfSpace(2 * PAGE_SIZE))
        );
        assert!(p.allocate(PAGE_SIZE).is_ok());

        let stray = VirtualAddress::new(BASE + PAGE_SIZE);
        assert_eq!(p.release(stray), Err(VmPoolError::UnknownRegion(stray)));
        assert_eq!(p.region_count(), 2);
    }

    #[test]
    fn region_table_limit() {
        let mut p = pool(MAX_REGIONS as u32 + 1);
        for _ in 0..MAX_REGIONS {
            p.allocate(1).unwrap();
        }
        assert_eq!(p.allocate(1), Err(VmPoolError::RegionTableFull));
    }

    #[test]
    fn pool_geometry_is_validated() {
        let id = FramePoolId::from_index(0);
        let dir = FrameNumber::new(1);
        assert_eq!(
            VmPool::new(VirtualAddress::new(0x1001), PAGE_SIZE, id, dir).err(),
            Some(VmPoolError::Unaligned(VirtualAddress::new(0x1001)))
        );
        assert_eq!(
            VmPool::new(VirtualAddress::new(0x1000), 100, id, dir).err(),
            Some(VmPoolError::InvalidSize(100))
        );
        assert!(matches!(
            VmPool::new(VirtualAddress::new(0xFFBF_F000), 2 * PAGE_SIZE, id, dir),
            Err(VmPoolError::ReservedRange { .. })
        ));
    }

    #[test]
    fn registry_rejects_overlap() {
        let mut r = VmPoolRegistry::new();
        assert!(r.is_empty());
        r.register(pool(16)).unwrap();
        let clash = VmPool::new(
            VirtualAddress::new(BASE + 15 * PAGE_SIZE),
            PAGE_SIZE,
            FramePoolId::from_index(0),
            FrameNumber::new(1),
        )
        .unwrap();
        assert!(matches!(
            r.register(clash),
            Err(VmPoolError::Overlapping { .. })
        ));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn claims_are_per_address_space() {
        let mut r = VmPoolRegistry::new();
        let own = r.register(pool(16)).unwrap();
        let foreign = VmPool::new(
            VirtualAddress::new(BASE + 16 * PAGE_SIZE),
            16 * PAGE_SIZE,
            FramePoolId::from_index(1),
            FrameNumber::new(2),
        )
        .unwrap();
        let foreign = r.register(foreign).unwrap();

        let a = r.get_mut(own).unwrap().allocate(PAGE_SIZE).unwrap();
        let b = r.get_mut(foreign).unwrap().allocate(PAGE_SIZE).unwrap();

        assert_eq!(r.claimant(FrameNumber::new(1), a).map(|(id, _)| id), Some(own));
        assert!(r.is_legitimate_in(FrameNumber::new(2), b));
        assert!(!r.is_legitimate_in(FrameNumber::new(1), b));
        assert!(!r.is_legitimate_in(FrameNumber::new(2), a));
        assert_eq!(
            r.claimant(FrameNumber::new(2), b).map(|(_, p)| p.frame_pool()),
            Some(FramePoolId::from_index(1))
        );
    }
}
