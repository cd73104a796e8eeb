//! Execution-context markers.
//!
//! The interception hooks run in a context that must not block or allocate
//! with unbounded latency; control requests run in an ordinary one. Each
//! context is represented by a zero-sized token that only exists inside a
//! scope opened by [`Passive::enter`] or [`Restricted::enter`]. APIs that may
//! allocate take `&Passive`, so they cannot be reached from a hook that was
//! only handed a `&Restricted`.
//!
//! Work a hook delegates to a trait object, such as an
//! [`IdentitySource`](crate::identity::IdentitySource), is outside the token's
//! reach. Those traits document the same bound for their implementors.
//!
//! Tokens are `!Send` and `!Sync`: they cannot be smuggled to another thread
//! or stored past the scope that created them.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static RESTRICTED_DEPTH: Cell<u32> = const { Cell::new(0) };
}

mod sealed {
    pub trait Sealed {}
}

/// Implemented by both context tokens. Operations that are safe everywhere
/// take `&impl ExecContext`.
pub trait ExecContext: sealed::Sealed {
    fn is_restricted(&self) -> bool;
}

/// Ordinary thread context: allocation, logging and blocking are allowed.
pub struct Passive {
    _not_send: PhantomData<*const ()>,
}

/// Interception context: bounded-time, non-blocking work only.
pub struct Restricted {
    _not_send: PhantomData<*const ()>,
}

impl sealed::Sealed for Passive {}
impl sealed::Sealed for Restricted {}

impl ExecContext for Passive {
    fn is_restricted(&self) -> bool {
        false
    }
}

impl ExecContext for Restricted {
    fn is_restricted(&self) -> bool {
        true
    }
}

impl Passive {
    /// Run `f` with a passive token. Opening a passive scope from inside a
    /// restricted one is a bug in the caller.
    pub fn enter<R>(f: impl FnOnce(&Passive) -> R) -> R {
        debug_assert!(
            !in_restricted(),
            "passive context requested from inside an interception hook"
        );
        let cx = Passive {
            _not_send: PhantomData,
        };
        f(&cx)
    }
}

impl Restricted {
    /// Run `f` with a restricted token. Scopes nest.
    pub fn enter<R>(f: impl FnOnce(&Restricted) -> R) -> R {
        struct Exit;
        impl Drop for Exit {
            fn drop(&mut self) {
                RESTRICTED_DEPTH.with(|d| d.set(d.get() - 1));
            }
        }

        RESTRICTED_DEPTH.with(|d| d.set(d.get() + 1));
        let _exit = Exit;
        let cx = Restricted {
            _not_send: PhantomData,
        };
        f(&cx)
    }
}

/// Whether the current thread is inside a restricted scope.
pub fn in_restricted() -> bool {
    RESTRICTED_DEPTH.with(|d| d.get() > 0)
}
