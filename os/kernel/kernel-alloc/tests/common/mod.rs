//! Shared setup for the integration tests: the 32 MiB machine layout and
//! a CPU-like access loop that services page faults.

#![allow(dead_code)]

use kernel_alloc::frame_alloc::ContFramePool;
use kernel_alloc::frame_pools::{FramePoolId, FramePoolRegistry};
use kernel_alloc::vmm::{FaultError, MemoryContext, PagingConfig};
use kernel_info::memory::{
    KERNEL_POOL_FRAMES, KERNEL_POOL_START_FRAME, MEM_HOLE_FRAMES, MEM_HOLE_START_FRAME,
    PROCESS_POOL_FRAMES, PROCESS_POOL_START_FRAME, SHARED_SIZE,
};
use kernel_memory_addresses::{FrameNumber, VirtualAddress};
use kernel_sim::SimMachine;
use kernel_vmem::AddressSpace;
use kernel_vmem::fault::SavedRegisters;

pub struct Pools<'m> {
    pub registry: FramePoolRegistry<'m>,
    pub kernel: FramePoolId,
    pub process: FramePoolId,
    pub process_info: FrameNumber,
}

/// Kernel pool at 2 MiB with its bitmap in its first frame; process pool at
/// 4 MiB with its bitmap in a kernel-pool frame and the hole at 15 MiB
/// marked inaccessible.
pub fn standard_pools(sim: &SimMachine) -> Pools<'_> {
    let mut registry = FramePoolRegistry::new();
    let kernel = registry
        .create_pool(
            sim,
            FrameNumber::new(KERNEL_POOL_START_FRAME),
            KERNEL_POOL_FRAMES,
            None,
        )
        .expect("kernel pool");

    let info_frames = ContFramePool::needed_info_frames(PROCESS_POOL_FRAMES);
    let process_info = registry
        .get_frames(kernel, info_frames)
        .expect("process pool info frame");
    let process = registry
        .create_pool(
            sim,
            FrameNumber::new(PROCESS_POOL_START_FRAME),
            PROCESS_POOL_FRAMES,
            Some(process_info),
        )
        .expect("process pool");
    registry
        .get_mut(process)
        .unwrap()
        .mark_inaccessible(FrameNumber::new(MEM_HOLE_START_FRAME), MEM_HOLE_FRAMES)
        .expect("memory hole");

    Pools {
        registry,
        kernel,
        process,
        process_info,
    }
}

pub fn standard_config(pools: &Pools<'_>) -> PagingConfig {
    PagingConfig {
        kernel_pool: pools.kernel,
        process_pool: pools.process,
        shared_size: SHARED_SIZE,
    }
}

/// A context with the first address space built, loaded and paging on.
pub fn paged(sim: &SimMachine) -> (MemoryContext<'_, SimMachine>, AddressSpace<'_, SimMachine>) {
    paged_with(sim, standard_pools(sim))
}

pub fn paged_with<'m>(
    sim: &'m SimMachine,
    pools: Pools<'m>,
) -> (MemoryContext<'m, SimMachine>, AddressSpace<'m, SimMachine>) {
    let config = standard_config(&pools);
    let mut ctx = MemoryContext::init_paging(sim, pools.registry, config).expect("init_paging");
    let space = ctx.create_address_space().expect("address space");
    unsafe {
        ctx.load(&space);
        ctx.enable_paging().expect("enable paging");
    }
    (ctx, space)
}

pub fn free_frames(ctx: &MemoryContext<'_, SimMachine>, id: FramePoolId) -> u32 {
    ctx.frame_pools().get(id).unwrap().free_frames()
}

/// Store a byte the way the CPU would: on a fault, run the handler and
/// retry the instruction. Returns the number of faults taken.
pub fn write_byte(
    ctx: &mut MemoryContext<'_, SimMachine>,
    va: VirtualAddress,
    value: u8,
) -> Result<usize, FaultError> {
    let sim = ctx.mmu();
    let mut faults = 0;
    loop {
        match sim.write_u8(va, value) {
            Ok(()) => return Ok(faults),
            Err(code) => {
                assert!(faults == 0, "fault at {va:?} was not resolved");
                ctx.handle_fault(&SavedRegisters::page_fault(code))?;
                faults += 1;
            }
        }
    }
}

/// Load a byte, servicing faults like [`write_byte`].
pub fn read_byte(
    ctx: &mut MemoryContext<'_, SimMachine>,
    va: VirtualAddress,
) -> Result<(u8, usize), FaultError> {
    let sim = ctx.mmu();
    let mut faults = 0;
    loop {
        match sim.read_u8(va) {
            Ok(value) => return Ok((value, faults)),
            Err(code) => {
                assert!(faults == 0, "fault at {va:?} was not resolved");
                ctx.handle_fault(&SavedRegisters::page_fault(code))?;
                faults += 1;
            }
        }
    }
}

/// Check that the bitmap agrees with the free count and that every frame
/// is either free or part of exactly one run.
pub fn assert_accounting(pool: &ContFramePool<'_>) {
    let census = pool.census();
    assert_eq!(census.corrupt, 0);
    assert_eq!(census.free, pool.free_frames());
    assert_eq!(census.free + census.used + census.heads, pool.frame_count());

    let base = pool.base_frame().as_u32();
    let in_runs: u32 = (base..base + pool.frame_count())
        .filter_map(|f| pool.run_length(FrameNumber::new(f)))
        .sum();
    // the pool's own info frame is USED without a head
    let headless = u32::from(pool.info_frame() == pool.base_frame());
    assert_eq!(in_runs + pool.free_frames() + headless, pool.frame_count());
}
