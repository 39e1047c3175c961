//! spinlock module
//! unlike `spin::Mutex`, a [`RawSpinLock`] protects no data and has no guard:
//! it is acquired and released by separate calls,
//! so that a lock can be held across a whole inode-layer call sequence.
//! Guarded data uses the `spin` crate instead.

use core::hint;
use core::sync::atomic::{fence, AtomicBool, Ordering};

pub struct RawSpinLock {
    name: &'static str,
    lock: AtomicBool,
}

impl RawSpinLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: AtomicBool::new(false),
        }
    }

    pub fn holding(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    /// Spin until the lock is ours.
    pub fn acquire(&self) {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        // keep the critical section's memory references
        // after the lock is acquired.
        fence(Ordering::SeqCst);
    }

    /// Panics if the lock is not held.
    pub fn release(&self) {
        if !self.holding() {
            panic!("release: {} not held", self.name);
        }
        fence(Ordering::SeqCst);
        self.lock.store(false, Ordering::Release);
    }
}
