//! Spin lock used by the registry and the event queue.
//!
//! Both structures are touched from the interception hooks, which must never
//! park the calling thread. `parking_lot::Mutex` parks after a short spin, so
//! the hooks get their own raw mutex that only ever spins. It plugs into
//! `lock_api` so callers keep the usual RAII guard API.

use parking_lot::lock_api::{self, GuardSend, RawMutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// Test-and-test-and-set lock. Acquisition is bounded by the length of the
/// critical sections it protects; it never sleeps.
pub struct RawSpinLock {
    locked: AtomicBool,
}

unsafe impl RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;
