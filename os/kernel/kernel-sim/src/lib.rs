//! # Simulated i386 Paging Unit
//!
//! A host-side stand-in for the parts of the processor the pager talks to:
//! physical RAM, CR0, CR2, CR3 and the two-level translation walk.
//!
//! - [`SimMachine`] implements [`PhysMapper`] and [`Mmu`], so the kernel
//!   code under test runs unchanged against it.
//! - Loads and stores through [`SimMachine::read_u32`] /
//!   [`SimMachine::write_u32`] behave like the CPU: a missing translation
//!   records the address in CR2 and yields the page-fault error code.
//!
//! There is no TLB: every access walks the tables in RAM. Instead,
//! [`SimMachine::cr3_loads`] counts directory loads so tests can check that
//! the pager flushes when it has to.
//!
//! Never linked into a kernel image.

#![allow(unsafe_code)]

use core::cell::{Cell, UnsafeCell};
use kernel_info::memory::{FRAME_SIZE, PHYS_MEMORY_END};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr2::Cr2;
use kernel_registers::cr3::Cr3;
use kernel_vmem::fault::PageFaultError;
use kernel_vmem::{Mmu, PageDirectory, PageTable, PhysMapper, split_indices};
use log::{debug, trace};

/// One 4 KiB frame of simulated RAM.
#[repr(C, align(4096))]
struct Frame([u8; FRAME_SIZE as usize]);

/// Simulated machine: RAM starting at physical address 0 plus the paging
/// control registers.
pub struct SimMachine {
    ram: Box<[UnsafeCell<Frame>]>,
    cr0: Cell<Cr0>,
    cr2: Cell<Cr2>,
    cr3: Cell<Cr3>,
    cr3_loads: Cell<usize>,
}

impl Default for SimMachine {
    /// A machine with [`PHYS_MEMORY_END`] bytes of RAM.
    fn default() -> Self {
        Self::with_frames(PHYS_MEMORY_END / FRAME_SIZE)
    }
}

impl SimMachine {
    /// A machine with `frames` zeroed frames of RAM, paging off.
    #[must_use]
    pub fn with_frames(frames: u32) -> Self {
        let ram = (0..frames)
            .map(|_| UnsafeCell::new(Frame([0; FRAME_SIZE as usize])))
            .collect();
        Self {
            ram,
            cr0: Cell::new(Cr0::new().with_pe_protection_enable(true)),
            cr2: Cell::new(Cr2::default()),
            cr3: Cell::new(Cr3::new()),
            cr3_loads: Cell::new(0),
        }
    }

    /// Number of RAM frames.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame_count(&self) -> u32 {
        self.ram.len() as u32
    }

    /// How many times CR3 has been written.
    #[must_use]
    pub fn cr3_loads(&self) -> usize {
        self.cr3_loads.get()
    }

    #[must_use]
    pub fn cr0(&self) -> Cr0 {
        self.cr0.get()
    }

    #[must_use]
    pub fn cr3(&self) -> Cr3 {
        self.cr3.get()
    }

    /// Pretend the CPU faulted at `va` (sets CR2 only).
    pub fn set_fault_address(&self, va: VirtualAddress) {
        self.cr2.set(Cr2::from_bits(va.as_u32()));
    }

    fn frame_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let idx = pa.frame().as_u32() as usize;
        assert!(
            idx < self.ram.len(),
            "physical access at {pa:?} beyond {} frames of RAM",
            self.ram.len()
        );
        let off = pa.offset().as_u32() as usize;
        unsafe { self.ram[idx].get().cast::<u8>().add(off) }
    }

    /// Read a 32-bit word at a physical address.
    #[must_use]
    pub fn phys_read_u32(&self, pa: PhysicalAddress) -> u32 {
        unsafe { self.frame_ptr(pa).cast::<u32>().read_unaligned() }
    }

    /// Write a 32-bit word at a physical address.
    pub fn phys_write_u32(&self, pa: PhysicalAddress, value: u32) {
        unsafe { self.frame_ptr(pa).cast::<u32>().write_unaligned(value) }
    }

    /// Translate `va` the way the paging unit does for an access of the
    /// given kind, without touching CR2.
    ///
    /// # Errors
    /// The page-fault error code the CPU would push.
    pub fn translate(
        &self,
        va: VirtualAddress,
        write: bool,
    ) -> Result<PhysicalAddress, PageFaultError> {
        if !self.cr0.get().pg_paging() {
            return Ok(PhysicalAddress::new(va.as_u32()));
        }

        let not_present = PageFaultError::new().with_write(write);
        let (pd, pt) = split_indices(va);

        let dir = unsafe { self.phys_to_mut::<PageDirectory>(self.cr3.get().directory_phys()) };
        let pde = dir.get(pd);
        let table = pde.next_table().ok_or(not_present)?;

        let table = unsafe { self.phys_to_mut::<PageTable>(table.base()) };
        let pte = table.get(pt);
        let frame = pte.page_frame().ok_or(not_present)?;

        // Supervisor accesses with CR0.WP clear ignore the writable bit;
        // with WP set a read-only page faults as a protection violation.
        if write
            && self.cr0.get().wp_write_protect()
            && !(pde.writable() && pte.writable())
        {
            return Err(not_present.with_present(true));
        }

        Ok(frame.join(va.offset()))
    }

    /// Perform an access; on a missing translation record CR2 like the CPU.
    fn access(&self, va: VirtualAddress, write: bool) -> Result<PhysicalAddress, PageFaultError> {
        self.translate(va, write).inspect_err(|e| {
            trace!("#PF at {va:?}: {}", e.explain());
            self.set_fault_address(va);
        })
    }

    /// Load a byte through the current translation.
    ///
    /// # Errors
    /// The page-fault error code; CR2 holds `va`.
    pub fn read_u8(&self, va: VirtualAddress) -> Result<u8, PageFaultError> {
        let pa = self.access(va, false)?;
        Ok(unsafe { self.frame_ptr(pa).read() })
    }

    /// Store a byte through the current translation.
    ///
    /// # Errors
    /// The page-fault error code; CR2 holds `va`.
    pub fn write_u8(&self, va: VirtualAddress, value: u8) -> Result<(), PageFaultError> {
        let pa = self.access(va, true)?;
        unsafe { self.frame_ptr(pa).write(value) };
        Ok(())
    }

    /// Load an aligned 32-bit word through the current translation.
    ///
    /// # Errors
    /// The page-fault error code; CR2 holds `va`.
    pub fn read_u32(&self, va: VirtualAddress) -> Result<u32, PageFaultError> {
        debug_assert!(va.as_u32().is_multiple_of(4));
        let pa = self.access(va, false)?;
        Ok(self.phys_read_u32(pa))
    }

    /// Store an aligned 32-bit word through the current translation.
    ///
    /// # Errors
    /// The page-fault error code; CR2 holds `va`.
    pub fn write_u32(&self, va: VirtualAddress, value: u32) -> Result<(), PageFaultError> {
        debug_assert!(va.as_u32().is_multiple_of(4));
        let pa = self.access(va, true)?;
        self.phys_write_u32(pa, value);
        Ok(())
    }
}

impl PhysMapper for SimMachine {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(
            pa.offset().as_u32() as usize + size_of::<T>() <= FRAME_SIZE as usize,
            "object at {pa:?} crosses a frame boundary"
        );
        unsafe { &mut *self.frame_ptr(pa).cast::<T>() }
    }
}

impl Mmu for SimMachine {
    fn fault_address(&self) -> VirtualAddress {
        self.cr2.get().fault_address()
    }

    fn current_directory(&self) -> FrameNumber {
        self.cr3.get().directory_frame()
    }

    unsafe fn load_directory(&self, directory: FrameNumber) {
        self.cr3.set(Cr3::from_directory_frame(directory));
        self.cr3_loads.set(self.cr3_loads.get() + 1);
        trace!("CR3 <- {:?}", directory.base());
    }

    fn paging_enabled(&self) -> bool {
        self.cr0.get().pg_paging()
    }

    unsafe fn enable_paging(&self) {
        self.cr0.set(self.cr0.get().with_pg_paging(true));
        debug!("CR0.PG set, directory at {:?}", self.cr3.get().directory_phys());
    }

    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        match self.translate(va, true) {
            Ok(pa) => unsafe { self.phys_to_mut(pa) },
            Err(e) => panic!("kernel access to {va:?} faulted: {}", e.explain()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::{Pde, Pte, self_map};

    fn machine_with_one_mapping() -> SimMachine {
        let sim = SimMachine::with_frames(16);
        // directory at frame 1, table at frame 2, 0x0040_0000 -> frame 5
        let dir = unsafe { sim.phys_to_mut::<PageDirectory>(FrameNumber::new(1).base()) };
        dir.set(self_map::SELF_MAP_INDEX, Pde::table(FrameNumber::new(1)));
        dir.set(
            kernel_vmem::DirectoryIndex::new(1),
            Pde::table(FrameNumber::new(2)),
        );
        let table = unsafe { sim.phys_to_mut::<PageTable>(FrameNumber::new(2).base()) };
        table.set(kernel_vmem::TableIndex::new(0), Pte::page(FrameNumber::new(5)));
        unsafe {
            sim.load_directory(FrameNumber::new(1));
            sim.enable_paging();
        }
        sim
    }

    #[test]
    fn identity_before_paging() {
        let sim = SimMachine::with_frames(4);
        sim.write_u32(VirtualAddress::new(0x1004), 0xDEAD_BEEF).unwrap();
        assert_eq!(sim.phys_read_u32(PhysicalAddress::new(0x1004)), 0xDEAD_BEEF);
        assert!(!sim.paging_enabled());
    }

    #[test]
    fn walk_and_fault() {
        let sim = machine_with_one_mapping();
        assert_eq!(sim.cr3_loads(), 1);
        assert!(sim.cr0().pg_paging());

        sim.write_u8(VirtualAddress::new(0x0040_0010), 0xAB).unwrap();
        assert_eq!(sim.read_u8(VirtualAddress::new(0x0040_0010)), Ok(0xAB));
        assert_eq!(sim.phys_read_u32(PhysicalAddress::new(0x5010)) & 0xFF, 0xAB);

        let err = sim.write_u8(VirtualAddress::new(0x0040_1000), 1).unwrap_err();
        assert!(!err.present() && err.write());
        assert_eq!(sim.fault_address(), VirtualAddress::new(0x0040_1000));

        let err = sim.read_u32(VirtualAddress::new(0x0080_0000)).unwrap_err();
        assert!(!err.present() && !err.write());
        assert_eq!(sim.fault_address(), VirtualAddress::new(0x0080_0000));
    }

    #[test]
    fn self_map_windows_resolve() {
        let sim = machine_with_one_mapping();
        assert_eq!(
            sim.translate(self_map::directory_window(), false),
            Ok(PhysicalAddress::new(0x1000))
        );
        assert_eq!(
            sim.translate(self_map::table_window(kernel_vmem::DirectoryIndex::new(1)), false),
            Ok(PhysicalAddress::new(0x2000))
        );
        let table: &mut PageTable =
            unsafe { sim.virt_to_mut(self_map::table_window(kernel_vmem::DirectoryIndex::new(1))) };
        assert!(table.get(kernel_vmem::TableIndex::new(0)).present());
    }
}
