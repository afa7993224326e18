//! # Typed i386 Control Registers
//!
//! Bitfield models of the control registers the paging code touches:
//!
//! - [`cr0::Cr0`]: the `PG` bit turns translation on.
//! - [`cr2::Cr2`]: the linear address that caused the last page fault.
//! - [`cr3::Cr3`]: the physical base of the active page directory.
//!
//! With the `asm` feature on a 32-bit x86 target the registers implement
//! [`LoadRegisterUnsafe`] / [`StoreRegisterUnsafe`] through `mov` to and
//! from the control register. On other targets only the bit layouts are
//! available, which is what the host-side simulator needs.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// Control register reads are privileged; the caller must run at CPL 0.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must run at CPL 0 and the new value must keep the current
    /// code mapped, or the next fetch faults.
    unsafe fn store_unsafe(self);
}
