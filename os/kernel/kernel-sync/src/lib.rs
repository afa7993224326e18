//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core and services exceptions to completion,
//! so the only hazard to shared state is the exception path re-entering
//! code that already holds it. [`KernelCell`] turns that into an error
//! instead of a second `&mut`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod kernel_cell;

pub use kernel_cell::{KernelCell, KernelCellError, KernelCellGuard};
