use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// Exclusive, non-blocking cell for state shared with exception handlers.
///
/// Unlike a spin lock, a second entry never waits: on a uniprocessor the
/// holder cannot make progress while the second entrant runs, so waiting
/// would hang. [`try_enter`](Self::try_enter) reports
/// [`KernelCellError::Busy`] instead.
pub struct KernelCell<T> {
    /// entry state
    /// * `false`: free
    /// * `true`: entered
    entered: AtomicBool,
    inner: UnsafeCell<T>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelCellError {
    #[error("the cell is already entered")]
    Busy,
}

// Safety: exclusive access; only T: Send may cross threads.
unsafe impl<T: Send> Sync for KernelCell<T> {}

impl<T> KernelCell<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            entered: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Enter once; returns immediately.
    ///
    /// # Errors
    /// [`KernelCellError::Busy`] while another guard is alive.
    #[inline]
    pub fn try_enter(&self) -> Result<KernelCellGuard<'_, T>, KernelCellError> {
        if self
            .entered
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(KernelCellGuard { cell: self })
        } else {
            Err(KernelCellError::Busy)
        }
    }

    /// Closure convenience, built on the guard.
    ///
    /// # Errors
    /// [`KernelCellError::Busy`] while another guard is alive; `f` is not
    /// called.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, KernelCellError> {
        let mut g = self.try_enter()?;
        Ok(f(&mut g))
    }

    /// Whether a guard is currently alive.
    #[inline]
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Relaxed)
    }

    /// Mutable access when you have `&mut self` (no entry possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct KernelCellGuard<'a, T> {
    cell: &'a KernelCell<T>,
}

impl<T> Deref for KernelCellGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.cell.inner.get() }
    }
}

impl<T> DerefMut for KernelCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.cell.inner.get() }
    }
}

impl<T> Drop for KernelCellGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes the changes made through the guard.
        self.cell.entered.store(false, Ordering::Release);
    }
}
