//! # Identity PhysMapper and the i386 Paging Unit
//!
//! The kernel keeps its own memory, including every page directory and page
//! table frame, in the shared low region. That region is identity mapped in
//! every address space, so a physical address there is also a usable
//! virtual address before and after paging is turned on.
//!
//! - [`IdentityPhysMapper`] turns a physical address into a reference by
//!   plain cast.
//! - `X86Mmu` (32-bit x86 only) drives the real control registers through
//!   `kernel-registers` and reaches virtual addresses through the same cast.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::IdentityPhysMapper;
//! use kernel_vmem::{PageTable, PhysMapper, addresses::PhysicalAddress};
//! let mapper = IdentityPhysMapper;
//! unsafe {
//!     let table: &mut PageTable = mapper.phys_to_mut(PhysicalAddress::new(0x0020_0000));
//!     table.fill(kernel_vmem::Pte::absent());
//! }
//! ```

use kernel_vmem::PhysMapper;
use kernel_vmem::addresses::PhysicalAddress;

/// [`PhysMapper`] for identity-mapped physical memory.
///
/// # Safety
/// - The referenced frame must lie in the identity-mapped shared region, or
///   paging must be off.
#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = pa.as_u32() as usize as *mut T;
        // SAFETY: Caller must ensure the frame is identity mapped.
        unsafe { &mut *ptr }
    }
}

#[cfg(target_arch = "x86")]
pub use x86::X86Mmu;

#[cfg(target_arch = "x86")]
mod x86 {
    use super::IdentityPhysMapper;
    use kernel_registers::cr0::Cr0;
    use kernel_registers::cr2::Cr2;
    use kernel_registers::cr3::Cr3;
    use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
    use kernel_vmem::addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
    use kernel_vmem::{Mmu, PhysMapper};

    /// The processor's own paging unit.
    ///
    /// Must only be used at CPL 0.
    #[derive(Debug, Copy, Clone, Default)]
    pub struct X86Mmu;

    impl PhysMapper for X86Mmu {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            unsafe { IdentityPhysMapper.phys_to_mut(pa) }
        }
    }

    impl Mmu for X86Mmu {
        fn fault_address(&self) -> VirtualAddress {
            unsafe { Cr2::load_unsafe() }.fault_address()
        }

        fn current_directory(&self) -> FrameNumber {
            unsafe { Cr3::load_unsafe() }.directory_frame()
        }

        unsafe fn load_directory(&self, directory: FrameNumber) {
            unsafe { Cr3::from_directory_frame(directory).store_unsafe() }
        }

        fn paging_enabled(&self) -> bool {
            unsafe { Cr0::load_unsafe() }.pg_paging()
        }

        unsafe fn enable_paging(&self) {
            unsafe {
                let cr0 = Cr0::load_unsafe();
                cr0.with_pg_paging(true).store_unsafe();
            }
        }

        unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
            let ptr = va.as_u32() as usize as *mut T;
            unsafe { &mut *ptr }
        }
    }
}
