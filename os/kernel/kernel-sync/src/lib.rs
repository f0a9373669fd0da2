//! # Kernel synchronization primitives
//!
//! - [`SpinLock`]: the kernel's mutual-exclusion lock.
//! - [`CondVar`]: wait channel used with a [`SpinLock`] in monitor style.
//! - [`InterruptState`] / [`IrqGuard`]: the simulated `splhigh()`/`splx()` pair,
//!   and [`SpinLock::lock_irq`] which combines it with a lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod condvar;
pub mod irq;
mod spin_lock;

pub use condvar::CondVar;
pub use irq::{InterruptState, IrqGuard, IrqSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
