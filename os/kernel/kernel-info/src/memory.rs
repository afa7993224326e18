//! # Memory Layout

/// One kibibyte.
pub const KIB: u32 = 1024;

/// One mebibyte.
pub const MIB: u32 = 1024 * KIB;

/// One gibibyte.
pub const GIB: u32 = 1024 * MIB;

/// Size of a physical frame and of a virtual page, in bytes.
pub const FRAME_SIZE: u32 = 4 * KIB;

/// Amount of physical memory the kernel manages.
pub const PHYS_MEMORY_END: u32 = 32 * MIB;

/// First frame of the kernel frame pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: u32 = (2 * MIB) / FRAME_SIZE;

/// Number of frames in the kernel frame pool (2 MiB worth).
pub const KERNEL_POOL_FRAMES: u32 = (2 * MIB) / FRAME_SIZE;

/// First frame of the process frame pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: u32 = (4 * MIB) / FRAME_SIZE;

/// Number of frames in the process frame pool (28 MiB worth).
pub const PROCESS_POOL_FRAMES: u32 = (28 * MIB) / FRAME_SIZE;

/// First frame of the physical memory hole at 15 MiB.
pub const MEM_HOLE_START_FRAME: u32 = (15 * MIB) / FRAME_SIZE;

/// Length of the physical memory hole in frames (1 MiB worth).
pub const MEM_HOLE_FRAMES: u32 = MIB / FRAME_SIZE;

/// Bytes at the bottom of every address space that are identity mapped and
/// shared between all page tables.
pub const SHARED_SIZE: u32 = 4 * MIB;

/// Start of the recursive page-table window (last directory slot).
pub const SELF_MAP_BASE: u32 = 0xFFC0_0000;

/// Virtual base of the code VM pool.
pub const CODE_POOL_BASE: u32 = 512 * MIB;

/// Size of the code VM pool.
pub const CODE_POOL_SIZE: u32 = 256 * MIB;

/// Virtual base of the heap VM pool.
pub const HEAP_POOL_BASE: u32 = GIB;

/// Size of the heap VM pool.
pub const HEAP_POOL_SIZE: u32 = 256 * MIB;

const _: () = {
    assert!(KERNEL_POOL_FRAMES.is_multiple_of(8));
    assert!(PROCESS_POOL_FRAMES.is_multiple_of(8));
    assert!(PROCESS_POOL_FRAMES <= FRAME_SIZE * 4);

    // Page-table frames come from the kernel pool and must stay identity mapped.
    assert!((KERNEL_POOL_START_FRAME + KERNEL_POOL_FRAMES) * FRAME_SIZE <= SHARED_SIZE);
    assert!(KERNEL_POOL_START_FRAME + KERNEL_POOL_FRAMES <= PROCESS_POOL_START_FRAME);
    assert!((PROCESS_POOL_START_FRAME + PROCESS_POOL_FRAMES) * FRAME_SIZE <= PHYS_MEMORY_END);

    assert!(MEM_HOLE_START_FRAME >= PROCESS_POOL_START_FRAME);
    assert!(
        MEM_HOLE_START_FRAME + MEM_HOLE_FRAMES <= PROCESS_POOL_START_FRAME + PROCESS_POOL_FRAMES
    );

    assert!(SHARED_SIZE.is_multiple_of(FRAME_SIZE));
    assert!(CODE_POOL_BASE >= SHARED_SIZE);
    assert!(CODE_POOL_BASE + CODE_POOL_SIZE <= HEAP_POOL_BASE);
    assert!(HEAP_POOL_BASE + HEAP_POOL_SIZE <= SELF_MAP_BASE);
};
