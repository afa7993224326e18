mod common;

use common::{assert_accounting, standard_pools};
use kernel_alloc::frame_alloc::{ContFramePool, FramePoolError, FrameState};
use kernel_alloc::frame_pools::FramePoolRegistry;
use kernel_info::memory::{
    KERNEL_POOL_FRAMES, KERNEL_POOL_START_FRAME, MEM_HOLE_FRAMES, MEM_HOLE_START_FRAME,
    PROCESS_POOL_FRAMES, PROCESS_POOL_START_FRAME,
};
use kernel_memory_addresses::FrameNumber;
use kernel_sim::SimMachine;

#[test]
fn standard_layout_accounting() {
    let sim = SimMachine::default();
    let pools = standard_pools(&sim);

    let kernel = pools.registry.get(pools.kernel).unwrap();
    // own bitmap frame plus the process pool's bitmap frame
    assert_eq!(kernel.free_frames(), KERNEL_POOL_FRAMES - 2);
    assert_eq!(
        kernel.state_of(FrameNumber::new(KERNEL_POOL_START_FRAME)),
        Ok(FrameState::Used)
    );
    assert_eq!(
        kernel.state_of(pools.process_info),
        Ok(FrameState::HeadOfSequence)
    );
    assert_accounting(kernel);

    let process = pools.registry.get(pools.process).unwrap();
    assert_eq!(process.free_frames(), PROCESS_POOL_FRAMES - MEM_HOLE_FRAMES);
    assert_eq!(process.info_frame(), pools.process_info);
    assert_eq!(
        process.run_length(FrameNumber::new(MEM_HOLE_START_FRAME)),
        Some(MEM_HOLE_FRAMES)
    );
    assert_accounting(process);
}

#[test]
fn bitmap_lives_in_the_info_frame() {
    let sim = SimMachine::default();
    let mut pools = standard_pools(&sim);
    assert_eq!(sim.phys_read_u32(pools.process_info.base()), 0);

    let first = pools.registry.get_frames(pools.process, 2).unwrap();
    assert_eq!(first, FrameNumber::new(PROCESS_POOL_START_FRAME));
    // frame 0 head, frame 1 used
    assert_eq!(sim.phys_read_u32(pools.process_info.base()) & 0xFF, 0b01_11);
}

#[test]
fn allocations_skip_the_hole() {
    let sim = SimMachine::default();
    let mut pools = standard_pools(&sim);
    let below_hole = MEM_HOLE_START_FRAME - PROCESS_POOL_START_FRAME;

    // too long for the run below the hole
    let big = pools.registry.get_frames(pools.process, below_hole + 1).unwrap();
    assert_eq!(big, FrameNumber::new(MEM_HOLE_START_FRAME + MEM_HOLE_FRAMES));

    let low = pools.registry.get_frames(pools.process, below_hole).unwrap();
    assert_eq!(low, FrameNumber::new(PROCESS_POOL_START_FRAME));

    assert_accounting(pools.registry.get(pools.process).unwrap());
}

#[test]
fn release_restores_state() {
    let sim = SimMachine::default();
    let mut pools = standard_pools(&sim);
    let before = pools.registry.get(pools.process).unwrap().census();

    let runs: Vec<_> = [1, 7, 64, 3]
        .into_iter()
        .map(|n| pools.registry.get_frames(pools.process, n).unwrap())
        .collect();
    assert_eq!(
        pools.registry.get(pools.process).unwrap().free_frames(),
        PROCESS_POOL_FRAMES - MEM_HOLE_FRAMES - 75
    );
    assert_accounting(pools.registry.get(pools.process).unwrap());

    for (run, n) in runs.iter().zip([1, 7, 64, 3]) {
        assert_eq!(pools.registry.release_frames(*run), Ok(n));
    }
    assert_eq!(pools.registry.get(pools.process).unwrap().census(), before);
}

#[test]
fn fill_exactly_then_exhaust() {
    // a + b == free, requested in either order
    for first in [10, 21] {
        let sim = SimMachine::with_frames(64);
        let mut registry = FramePoolRegistry::new();
        let id = registry
            .create_pool(&sim, FrameNumber::new(16), 32, None)
            .unwrap();
        let free = registry.get(id).unwrap().free_frames();
        assert_eq!(free, 31);

        let a = registry.get_frames(id, first).unwrap();
        let b = registry.get_frames(id, free - first).unwrap();
        assert_eq!(a, FrameNumber::new(17));
        assert_eq!(b, FrameNumber::new(17 + first));
        assert_eq!(registry.get(id).unwrap().free_frames(), 0);

        assert_eq!(
            registry.get_frames(id, 1),
            Err(FramePoolError::Exhausted {
                requested: 1,
                free: 0
            })
        );
        assert_accounting(registry.get(id).unwrap());

        assert_eq!(registry.release_frames(a), Ok(first));
        assert_eq!(registry.release_frames(b), Ok(free - first));
        assert_eq!(registry.get(id).unwrap().free_frames(), free);
    }
}

#[test]
fn over_allocation_changes_nothing() {
    let sim = SimMachine::default();
    let mut pools = standard_pools(&sim);
    let free = pools.registry.get(pools.kernel).unwrap().free_frames();
    let before = pools.registry.get(pools.kernel).unwrap().census();

    assert!(matches!(
        pools.registry.get_frames(pools.kernel, free + 1),
        Err(FramePoolError::Exhausted { .. })
    ));
    assert!(matches!(
        pools.registry.get_frames(pools.kernel, KERNEL_POOL_FRAMES + 1),
        Err(FramePoolError::Exhausted { .. })
    ));
    assert_eq!(pools.registry.get(pools.kernel).unwrap().census(), before);
}

#[test]
fn release_protocol_violations() {
    let sim = SimMachine::default();
    let mut pools = standard_pools(&sim);
    let run = pools.registry.get_frames(pools.process, 4).unwrap();
    let free = pools.registry.get(pools.process).unwrap().free_frames();

    assert_eq!(
        pools.registry.release_frames(run + 2),
        Err(FramePoolError::NotHeadOfSequence(run + 2))
    );
    assert_eq!(
        pools.registry.release_frames(FrameNumber::new(KERNEL_POOL_START_FRAME)),
        Err(FramePoolError::NotHeadOfSequence(FrameNumber::new(
            KERNEL_POOL_START_FRAME
        )))
    );
    assert_eq!(
        pools.registry.release_frames(FrameNumber::new(100)),
        Err(FramePoolError::NoOwningPool(FrameNumber::new(100)))
    );
    assert_eq!(pools.registry.get(pools.process).unwrap().free_frames(), free);
}

#[test]
fn pools_must_not_overlap() {
    let sim = SimMachine::default();
    let mut pools = standard_pools(&sim);
    assert_eq!(
        pools
            .registry
            .create_pool(&sim, FrameNumber::new(1016), 16, Some(FrameNumber::new(8)))
            .err(),
        Some(FramePoolError::OverlappingPool {
            base: FrameNumber::new(1016),
            end: FrameNumber::new(1032)
        })
    );
}

#[test]
fn info_frame_sizing() {
    assert_eq!(ContFramePool::needed_info_frames(PROCESS_POOL_FRAMES), 1);
    assert_eq!(ContFramePool::needed_info_frames(16384), 1);
    assert_eq!(ContFramePool::needed_info_frames(16385), 2);
    assert_eq!(ContFramePool::needed_info_frames(3 * 16384), 3);
}
