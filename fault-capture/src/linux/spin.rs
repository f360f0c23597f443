//! A busy-wait lock that can be taken from inside a signal handler.
//!
//! OS locks such as `pthread_mutex_t` are not async signal safe, and a thread
//! that faults while holding one would never be able to release it, so the
//! capture path serializes faulting threads by spinning on an atomic instead.

use std::sync::atomic::{AtomicI32, Ordering};

/// Spin lock guarding the capture buffer and the write side of the channel.
///
/// The lock word is the kernel thread id of the holder, so taking the lock and
/// recording who took it is a single atomic step. A signal landing on the
/// holder between the two would otherwise spin on a lock it already owns.
///
/// # Priority inversion
///
/// Waiters never yield the processor. If a low priority thread holds the lock
/// when a higher priority thread faults on the same CPU, the higher priority
/// thread can spin forever while the holder never gets scheduled to release
/// it. A sleeping `trylock` loop would avoid this at the cost of latency while
/// crashing, we accept the hazard.
pub(crate) struct SpinLock {
    /// Kernel thread id of the holder, 0 when unlocked
    owner: AtomicI32,
}

const UNLOCKED: i32 = 0;

impl SpinLock {
    pub(crate) const fn new() -> Self {
        Self {
            owner: AtomicI32::new(UNLOCKED),
        }
    }

    /// Spins until the lock is acquired by the thread `tid`, which must not be
    /// 0.
    ///
    /// Returns `false` without acquiring if `tid` already holds the lock, which
    /// happens when the capture path itself faults.
    pub(crate) fn lock(&self, tid: i32) -> bool {
        debug_assert_ne!(tid, UNLOCKED);

        loop {
            match self
                .owner
                .compare_exchange_weak(UNLOCKED, tid, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(holder) if holder == tid => return false,
                Err(_) => {
                    while self.owner.load(Ordering::Relaxed) != UNLOCKED {
                        std::hint::spin_loop();
                    }
                }
            }
        }
    }

    pub(crate) fn unlock(&self) {
        self.owner.store(UNLOCKED, Ordering::Release);
    }

    /// The thread holding the lock, if any
    #[inline]
    pub(crate) fn holder(&self) -> Option<i32> {
        match self.owner.load(Ordering::Acquire) {
            UNLOCKED => None,
            tid => Some(tid),
        }
    }
}
