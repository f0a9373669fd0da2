use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Interrupt-enable flag of one simulated processor.
///
/// Stands in for the status register's `IE` bit: [`disable`](Self::disable)
/// is `splhigh()`, [`restore`](Self::restore) is `splx()`.
#[derive(Debug)]
pub struct InterruptState {
    enabled: AtomicBool,
}

impl Default for InterruptState {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptState {
    /// A processor with interrupts enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disables interrupts and returns whether they were enabled before.
    #[inline]
    pub fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }

    /// Restores the state returned by an earlier [`disable`](Self::disable).
    #[inline]
    pub fn restore(&self, were_enabled: bool) {
        if were_enabled {
            self.enabled.store(true, Ordering::Release);
        }
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Nested guards compose: only the outermost one re-enables interrupts.
///
/// # Examples
///
/// ```
/// use kernel_sync::{InterruptState, IrqGuard};
///
/// let cpu = InterruptState::new();
/// {
///     let _outer = IrqGuard::new(&cpu);
///     {
///         let _inner = IrqGuard::new(&cpu);
///     }
///     assert!(!cpu.enabled());
/// }
/// assert!(cpu.enabled());
/// ```
pub struct IrqGuard<'a> {
    cpu: &'a InterruptState,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a> IrqGuard<'a> {
    #[inline]
    #[must_use]
    pub fn new(cpu: &'a InterruptState) -> Self {
        let were_enabled = cpu.disable();
        Self { cpu, were_enabled }
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.cpu.restore(self.were_enabled);
    }
}

/// A [`SpinLockGuard`] that also keeps interrupts disabled while held.
///
/// Created by [`SpinLock::lock_irq`]. The lock is released before
/// interrupts are restored.
pub struct IrqSpinLockGuard<'a, T> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<'a>,
}

impl<T> SpinLock<T> {
    /// Disables interrupts on `cpu`, then acquires the lock.
    #[inline]
    pub fn lock_irq<'a>(&'a self, cpu: &'a InterruptState) -> IrqSpinLockGuard<'a, T> {
        let irq = IrqGuard::new(cpu);
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
