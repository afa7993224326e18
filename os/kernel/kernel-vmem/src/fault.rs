//! # Page-Fault Exception Contract
//!
//! What the exception dispatcher hands to the pager for vector 14: the
//! register frame saved by the common interrupt stub, including the error
//! code the CPU pushed.

use bitfield_struct::bitfield;

/// Exception vector of #PF.
pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Page-fault error code layout (i386).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(25)]
    __: u32, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped yet)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Register frame built by the common exception stub.
///
/// Layout, lowest address first: the data segment selectors pushed by the
/// stub, the `pusha` block, the vector number and error code, then the
/// frame pushed by the CPU. `useresp`/`ss` are only valid when the fault
/// came from ring 3.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SavedRegisters {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

const _: () = assert!(size_of::<SavedRegisters>() == 19 * 4);

impl SavedRegisters {
    /// A frame carrying only a page-fault error code.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn page_fault(error: PageFaultError) -> Self {
        Self {
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            int_no: PAGE_FAULT_VECTOR as u32,
            err_code: error.into_bits(),
            eip: 0,
            cs: 0,
            eflags: 0,
            useresp: 0,
            ss: 0,
        }
    }

    /// The decoded page-fault error code.
    #[inline]
    #[must_use]
    pub const fn fault_error(&self) -> PageFaultError {
        PageFaultError::from_bits(self.err_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_bits() {
        let e = PageFaultError::from_bits(0b110);
        assert!(!e.present() && e.write() && e.user());
        assert_eq!(e.explain(), "Non-present page (page not mapped yet)");

        let e = PageFaultError::new().with_present(true).with_write(true);
        assert_eq!(e.into_bits(), 0b011);
        assert_eq!(e.explain(), "Write access to protected page");

        let regs = SavedRegisters::page_fault(e);
        assert_eq!(regs.int_no, 14);
        assert_eq!(regs.fault_error(), e);
    }
}
