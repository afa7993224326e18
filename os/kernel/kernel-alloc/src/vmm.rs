//! # Demand-Paging Virtual Memory Manager
//!
//! [`MemoryContext`] owns everything the pager needs: the frame pools, the
//! registered VM pools, the paging configuration and which directory is
//! loaded. It walks through the states
//!
//! ```text
//! init_paging → create_address_space → load → enable_paging → handle_fault*
//! ```
//!
//! Only the shared region is mapped up front. Every other page is backed the
//! first time it is touched: [`MemoryContext::handle_fault`] checks that the
//! address belongs to a live region of a VM pool of the loaded address
//! space, installs a page table from the kernel pool if the directory slot is
//! empty, and maps a fresh frame from that VM pool's frame pool (the process
//! pool while no VM pool is registered).
//!
//! Directory and table frames come from the kernel pool, which must lie in
//! the identity-mapped shared region; after paging is on the loaded tables
//! are edited through the recursive self-map only.
//!
//! # Example
//! ```ignore
//! let mut ctx = MemoryContext::init_paging(&mmu, pools, config)?;
//! let space = ctx.create_address_space()?;
//! unsafe {
//!     ctx.load(&space);
//!     ctx.enable_paging()?;
//! }
//! let heap = ctx.create_vm_pool(HEAP_BASE, HEAP_SIZE, process_pool, &space)?;
//! let buffer = ctx.vm_allocate(heap, 8192)?; // mapped on first touch
//! ```

use crate::frame_alloc::FramePoolError;
use crate::frame_pools::{FramePoolId, FramePoolRegistry};
use crate::vm_pool::{VmPool, VmPoolError, VmPoolId, VmPoolRegistry};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage};
use kernel_vmem::address_space::MAX_SHARED_SIZE;
use kernel_vmem::fault::SavedRegisters;
use kernel_vmem::{ActivePageTables, AddressSpace, MapError, Mmu, self_map};
use log::{debug, info, warn};

/// Pools and shared-region size handed to [`MemoryContext::init_paging`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PagingConfig {
    /// Frames for page directories and page tables. Must lie inside the
    /// shared region.
    pub kernel_pool: FramePoolId,
    /// Frames that back faulted-in pages.
    pub process_pool: FramePoolId,
    /// Bytes identity mapped from address 0 in every address space.
    pub shared_size: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("shared size {0:#x} is not a non-zero multiple of 4 KiB below the self-map")]
    InvalidSharedSize(u32),
    #[error("frame {0} holds paging metadata outside the identity-mapped shared region")]
    MetadataNotIdentityMapped(FrameNumber),
    #[error("no frame left for a page directory or page table")]
    OutOfFrames,
    #[error("no page directory is loaded")]
    NotLoaded,
    #[error("paging is not enabled")]
    PagingDisabled,
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error(transparent)]
    FramePool(#[from] FramePoolError),
    #[error(transparent)]
    VmPool(#[from] VmPoolError),
}

impl From<MapError> for PagingError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfFrames => Self::OutOfFrames,
            MapError::InvalidSharedSize(size) => Self::InvalidSharedSize(size),
            MapError::MissingTable(va) | MapError::NotMapped(va) => Self::NotMapped(va),
        }
    }
}

/// Why a page fault could not be resolved. Every variant is fatal for the
/// faulting context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("page fault at {0} with paging disabled")]
    PagingDisabled(VirtualAddress),
    #[error("protection violation at {address} (error code {code:#x})")]
    ProtectionViolation { address: VirtualAddress, code: u32 },
    #[error("page fault at {0} inside the self-map window")]
    SelfMapWindow(VirtualAddress),
    #[error("{0} is not inside any allocated region")]
    IllegitimateAccess(VirtualAddress),
    #[error("no frame left in pool {pool:?} to resolve the fault at {address}")]
    OutOfFrames {
        address: VirtualAddress,
        pool: FramePoolId,
    },
    #[error("page fault while the memory context was already in use")]
    Reentrant,
    #[error(transparent)]
    Map(#[from] MapError),
}

/// What [`MemoryContext::handle_fault`] installed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FaultResolution {
    /// Page now mapped.
    pub page: VirtualPage,
    /// Newly installed page table, if the directory slot was empty.
    pub table: Option<FrameNumber>,
    /// Frame backing `page`.
    pub frame: FrameNumber,
}

/// All paging state of the kernel.
pub struct MemoryContext<'m, M: Mmu> {
    mmu: &'m M,
    frames: FramePoolRegistry<'m>,
    vm_pools: VmPoolRegistry,
    config: PagingConfig,
    current: Option<FrameNumber>,
}

impl<'m, M: Mmu> MemoryContext<'m, M> {
    /// Validate `config` against `frames` and take ownership of the pools.
    ///
    /// # Errors
    /// - [`PagingError::InvalidSharedSize`].
    /// - [`FramePoolError::UnknownPool`] for either pool id.
    /// - [`PagingError::MetadataNotIdentityMapped`] if a kernel-pool frame
    ///   or any pool's bitmap frame lies outside the shared region.
    pub fn init_paging(
        mmu: &'m M,
        frames: FramePoolRegistry<'m>,
        config: PagingConfig,
    ) -> Result<Self, PagingError> {
        let shared = config.shared_size;
        if shared == 0 || !shared.is_multiple_of(PAGE_SIZE) || shared > MAX_SHARED_SIZE {
            return Err(PagingError::InvalidSharedSize(shared));
        }
        frames.get(config.process_pool)?;

        let shared_end = FrameNumber::new(shared / PAGE_SIZE);
        let kernel = frames.get(config.kernel_pool)?;
        if kernel.end_frame() > shared_end {
            return Err(PagingError::MetadataNotIdentityMapped(FrameNumber::new(
                kernel.end_frame().as_u32() - 1,
            )));
        }
        if let Some((_, pool)) = frames.iter().find(|(_, p)| p.info_frame() >= shared_end) {
            return Err(PagingError::MetadataNotIdentityMapped(pool.info_frame()));
        }

        info!(
            "Paging initialized: {shared:#x} bytes shared, kernel pool {:?}, process pool {:?}",
            config.kernel_pool, config.process_pool
        );
        Ok(Self {
            mmu,
            frames,
            vm_pools: VmPoolRegistry::new(),
            config,
            current: None,
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PagingConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &'m M {
        self.mmu
    }

    #[inline]
    #[must_use]
    pub const fn frame_pools(&self) -> &FramePoolRegistry<'m> {
        &self.frames
    }

    #[inline]
    pub const fn frame_pools_mut(&mut self) -> &mut FramePoolRegistry<'m> {
        &mut self.frames
    }

    #[inline]
    #[must_use]
    pub const fn vm_pools(&self) -> &VmPoolRegistry {
        &self.vm_pools
    }

    /// Directory most recently loaded through [`load`](Self::load).
    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<FrameNumber> {
        self.current
    }

    #[inline]
    #[must_use]
    pub fn paging_enabled(&self) -> bool {
        self.mmu.paging_enabled()
    }

    /// Build a directory whose shared region is identity mapped, with all
    /// frames taken from the kernel pool.
    ///
    /// # Errors
    /// [`PagingError::OutOfFrames`] if the kernel pool runs dry; frames
    /// already taken are returned.
    pub fn create_address_space(&mut self) -> Result<AddressSpace<'m, M>, PagingError> {
        let pool = self.frames.get_mut(self.config.kernel_pool)?;
        let space = AddressSpace::build(self.mmu, pool, self.config.shared_size)
            .inspect_err(|e| warn!("Cannot build address space: {e}"))?;
        Ok(space)
    }

    /// Write `space`'s directory to CR3.
    ///
    /// # Safety
    /// The running code and its stack must be mapped identically in `space`,
    /// which holds for anything in the shared region.
    pub unsafe fn load(&mut self, space: &AddressSpace<'_, M>) {
        unsafe { space.activate() };
        self.current = Some(space.root());
        info!("Loaded page directory at frame {}", space.root());
    }

    /// Turn translation on.
    ///
    /// # Safety
    /// Same as [`load`](Self::load) for the loaded directory.
    ///
    /// # Errors
    /// [`PagingError::NotLoaded`] if no directory was loaded first.
    pub unsafe fn enable_paging(&mut self) -> Result<(), PagingError> {
        let Some(directory) = self.current else {
            return Err(PagingError::NotLoaded);
        };
        unsafe { self.mmu.enable_paging() };
        info!("Paging enabled with directory at frame {directory}");
        Ok(())
    }

    /// The loaded tables, edited through the self-map.
    fn active(&self) -> Result<ActivePageTables<'m, M>, PagingError> {
        if self.current.is_none() {
            return Err(PagingError::NotLoaded);
        }
        if !self.mmu.paging_enabled() {
            return Err(PagingError::PagingDisabled);
        }
        // SAFETY: every directory built here carries the self-map.
        Ok(unsafe { ActivePageTables::new(self.mmu) })
    }

    /// Resolve a page fault at the address in CR2.
    ///
    /// # Errors
    /// See [`FaultError`]. Nothing is allocated unless the fault is
    /// resolved.
    pub fn handle_fault(&mut self, regs: &SavedRegisters) -> Result<FaultResolution, FaultError> {
        let address = self.mmu.fault_address();
        let error = regs.fault_error();

        if error.present() {
            return Err(FaultError::ProtectionViolation {
                address,
                code: error.into_bits(),
            });
        }
        let tables = self
            .active()
            .map_err(|_| FaultError::PagingDisabled(address))?;
        if self_map::is_self_map(address) {
            return Err(FaultError::SelfMapWindow(address));
        }
        let data_pool = if self.vm_pools.is_empty() {
            self.config.process_pool
        } else {
            self.current
                .and_then(|directory| self.vm_pools.claimant(directory, address))
                .map(|(_, pool)| pool.frame_pool())
                .ok_or(FaultError::IllegitimateAccess(address))?
        };

        let page = address.page();
        if let Ok(entry) = tables.entry(address)
            && let Some(frame) = entry.page_frame()
        {
            debug!("Spurious fault at {address}: already mapped to {frame}");
            unsafe { self.mmu.flush_tlb() };
            return Ok(FaultResolution {
                page,
                table: None,
                frame,
            });
        }

        let table = if tables.directory_entry(address).present() {
            None
        } else {
            let pool = self.config.kernel_pool;
            let frame = self
                .frames
                .get_frames(pool, 1)
                .map_err(|_| FaultError::OutOfFrames { address, pool })?;
            Some(frame)
        };

        let frame = match self.frames.get_frames(data_pool, 1) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("No frame for the fault at {address}: {e}");
                if let Some(table) = table
                    && let Err(e) = self.frames.release_frames(table)
                {
                    warn!("Could not return table frame {table}: {e}");
                }
                return Err(FaultError::OutOfFrames {
                    address,
                    pool: data_pool,
                });
            }
        };

        if let Some(table) = table {
            tables.install_table(address, table);
        }
        tables.map(address, frame)?;

        debug!("Fault at {address}: mapped {page:?} to {frame} (new table: {table:?})");
        Ok(FaultResolution { page, table, frame })
    }

    /// Unmap `page`, return its frame to its pool and flush the TLB.
    ///
    /// # Errors
    /// - [`PagingError::NotLoaded`] / [`PagingError::PagingDisabled`].
    /// - [`PagingError::NotMapped`] if either level is not present.
    /// - [`FramePoolError`] if the frame is not a pool allocation.
    pub fn free_page(&mut self, page: VirtualPage) -> Result<FrameNumber, PagingError> {
        let tables = self.active()?;
        let frame = tables
            .entry(page.base())?
            .page_frame()
            .ok_or(PagingError::NotMapped(page.base()))?;
        self.frames.release_frames(frame)?;
        tables.unmap(page.base())?;
        unsafe { self.mmu.flush_tlb() };
        debug!("Freed {page:?} (frame {frame})");
        Ok(frame)
    }

    /// Translate `va` under the current state: identity while paging is
    /// off, through the loaded tables afterwards.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if self.mmu.paging_enabled() {
            self.active().ok()?.translate(va)
        } else {
            Some(PhysicalAddress::new(va.as_u32()))
        }
    }

    /// Create a VM pool over `[base, base + size)` in `space`, backed by
    /// `frame_pool`, and register it.
    ///
    /// # Errors
    /// Anything [`VmPool::new`] or [`register_pool`](Self::register_pool)
    /// reports.
    pub fn create_vm_pool(
        &mut self,
        base: VirtualAddress,
        size: u32,
        frame_pool: FramePoolId,
        space: &AddressSpace<'_, M>,
    ) -> Result<VmPoolId, PagingError> {
        let pool = VmPool::new(base, size, frame_pool, space.root())?;
        self.register_pool(pool)
    }

    /// Append `pool` to the registry consulted by the fault handler.
    ///
    /// # Errors
    /// - [`VmPoolError::ReservedRange`] if the pool reaches into the shared
    ///   region.
    /// - [`FramePoolError::UnknownPool`] for its frame pool.
    /// - [`VmPoolError::Overlapping`] / [`VmPoolError::RegistryFull`].
    pub fn register_pool(&mut self, pool: VmPool) -> Result<VmPoolId, PagingError> {
        if pool.base().as_u32() < self.config.shared_size {
            return Err(VmPoolError::ReservedRange {
                base: pool.base(),
                size: pool.size(),
            }
            .into());
        }
        self.frames.get(pool.frame_pool())?;
        Ok(self.vm_pools.register(pool)?)
    }

    /// Reserve `bytes` in VM pool `id`. Pages are backed on first touch.
    ///
    /// # Errors
    /// See [`VmPool::allocate`].
    pub fn vm_allocate(&mut self, id: VmPoolId, bytes: u32) -> Result<VirtualAddress, PagingError> {
        Ok(self.vm_pools.get_mut(id)?.allocate(bytes)?)
    }

    /// Release the region starting at `start` in VM pool `id`: every page
    /// faulted in for it is unmapped and its frame returned, followed by a
    /// single TLB flush.
    ///
    /// Returns the number of pages that had been backed.
    ///
    /// # Errors
    /// - [`VmPoolError::NotLoaded`] unless the pool's directory is loaded
    ///   and paging is on; nothing changes.
    /// - [`VmPoolError::UnknownRegion`].
    /// - [`FramePoolError`] for the first backing frame that could not be
    ///   returned. The region is gone, every other page is still released and
    ///   the TLB is flushed.
    pub fn vm_release(&mut self, id: VmPoolId, start: VirtualAddress) -> Result<u32, PagingError> {
        let directory = self.vm_pools.get(id)?.directory();
        if self.current != Some(directory) || !self.mmu.paging_enabled() {
            return Err(VmPoolError::NotLoaded.into());
        }
        let tables = self.active()?;
        let region = self.vm_pools.get_mut(id)?.release(start)?;

        let mut backed = 0;
        let mut failed = None;
        let mut page = region.start().page();
        for _ in 0..region.pages() {
            if let Ok(frame) = tables.unmap(page.base()) {
                match self.frames.release_frames(frame) {
                    Ok(_) => backed += 1,
                    Err(e) => {
                        failed.get_or_insert(e);
                    }
                }
            }
            match page.next() {
                Some(next) => page = next,
                None => break,
            }
        }
        unsafe { self.mmu.flush_tlb() };
        if let Some(e) = failed {
            return Err(e.into());
        }

        debug!(
            "Released region {}+{:#x}: {backed} backed page(s) returned",
            region.start(),
            region.size()
        );
        Ok(backed)
    }
}
