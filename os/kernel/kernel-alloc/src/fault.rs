//! # Page-Fault Exception Adapter
//!
//! The interrupt dispatcher hands every exception to the handler registered
//! for its vector. [`PageFaultHandler`] is the one for vector 14: it reaches
//! the [`MemoryContext`] through a [`KernelCell`] and calls
//! [`MemoryContext::handle_fault`].
//!
//! A fault that cannot be resolved is logged with `error!` and returned;
//! the dispatcher halts on it. A fault raised while the memory context is
//! already in use (the pager itself faulted) is reported as
//! [`FaultError::Reentrant`] instead of re-entering it.

use crate::vmm::{FaultError, MemoryContext};
use kernel_sync::KernelCell;
use kernel_vmem::Mmu;
use kernel_vmem::fault::{PAGE_FAULT_VECTOR, SavedRegisters};
use log::{debug, error};

/// A handler the interrupt dispatcher can route an exception vector to.
pub trait ExceptionHandler {
    type Error;

    /// Vector this handler serves.
    fn vector(&self) -> u8;

    /// Service the exception described by `regs`.
    ///
    /// # Errors
    /// The exception could not be serviced; the dispatcher must not resume
    /// the interrupted context.
    fn handle_exception(&self, regs: &SavedRegisters) -> Result<(), Self::Error>;
}

/// Routes page faults to the demand pager.
pub struct PageFaultHandler<'c, 'm, M: Mmu> {
    context: &'c KernelCell<MemoryContext<'m, M>>,
}

impl<'c, 'm, M: Mmu> PageFaultHandler<'c, 'm, M> {
    #[must_use]
    pub const fn new(context: &'c KernelCell<MemoryContext<'m, M>>) -> Self {
        Self { context }
    }
}

impl<M: Mmu> ExceptionHandler for PageFaultHandler<'_, '_, M> {
    type Error = FaultError;

    fn vector(&self) -> u8 {
        PAGE_FAULT_VECTOR
    }

    fn handle_exception(&self, regs: &SavedRegisters) -> Result<(), FaultError> {
        let Ok(mut context) = self.context.try_enter() else {
            error!("Page fault at eip {:#010x} while the pager was running", regs.eip);
            return Err(FaultError::Reentrant);
        };

        match context.handle_fault(regs) {
            Ok(resolution) => {
                debug!(
                    "#PF resolved: {:?} -> {}",
                    resolution.page, resolution.frame
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Unrecoverable page fault ({}) at eip {:#010x}: {e}",
                    regs.fault_error().explain(),
                    regs.eip
                );
                Err(e)
            }
        }
    }
}
