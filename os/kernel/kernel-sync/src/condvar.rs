use crate::{SpinLock, SpinLockGuard};
use core::sync::atomic::{AtomicU64, Ordering};

/// Monitor-style wait channel paired with a [`SpinLock`].
///
/// A waiter snapshots a generation counter while still holding the lock,
/// releases the lock, and relaxes until a notifier bumps the generation.
/// Notifiers must bump while holding the same lock, which rules out lost
/// wake-ups. Wake-ups may be spurious, so callers re-check their predicate;
/// [`wait_while`](Self::wait_while) does that loop for them.
///
/// What "relax" means is up to the caller: the process layer passes the
/// scheduler's yield so that a blocked thread gives up the CPU.
#[derive(Debug, Default)]
pub struct CondVar {
    generation: AtomicU64,
}

impl CondVar {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// Releases `guard`, waits for a notification, then re-acquires the lock.
    pub fn wait<'a, T>(
        &self,
        guard: SpinLockGuard<'a, T>,
        mut relax: impl FnMut(),
    ) -> SpinLockGuard<'a, T> {
        let seen = self.generation.load(Ordering::Acquire);
        let lock: &'a SpinLock<T> = SpinLockGuard::unlock(guard);
        while self.generation.load(Ordering::Acquire) == seen {
            relax();
        }
        lock.lock()
    }

    /// Waits until `condition` returns `false`, re-checking after every wake-up.
    pub fn wait_while<'a, T>(
        &self,
        mut guard: SpinLockGuard<'a, T>,
        mut condition: impl FnMut(&mut T) -> bool,
        mut relax: impl FnMut(),
    ) -> SpinLockGuard<'a, T> {
        while condition(&mut guard) {
            guard = self.wait(guard, &mut relax);
        }
        guard
    }

    /// Wakes every waiter. Call with the associated lock held.
    #[inline]
    pub fn notify_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
