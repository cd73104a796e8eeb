//! Framework glue that drives the tracking hooks.
//!
//! [`GuardedFs`] wraps filesystem calls made through it with both hooks and
//! can refuse a deletion. [`DeletionWatcher`] only sees deletions after the
//! fact, so it feeds the post-operation hook alone.

pub mod guarded_fs;
pub mod watcher;

pub use guarded_fs::GuardedFs;
pub use watcher::DeletionWatcher;
