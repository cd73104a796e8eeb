//! Deletion tracking for a set of registered files.
//!
//! Paths are absolute POSIX paths and the control channel is a Unix domain
//! socket, so the crate builds for Unix targets only.

#[cfg(not(unix))]
compile_error!("tracker-core supports Unix targets only");

pub mod canonical;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod identity;
pub mod intercept;
pub mod ipc;
pub mod ipc_client;
pub mod paths;
pub mod queue;
pub mod record;
pub mod registry;
pub mod secret;
pub mod subsystem;
pub mod sync;

pub use canonical::{canonicalize, CanonicalPath};
pub use config::TrackerConfig;
pub use context::{Passive, Restricted};
pub use control::{ControlHandler, ControlRequest, ControlResponse, ControlStatus};
pub use error::TrackerError;
pub use intercept::{Completion, FileOperation, OperationKind, PostAction, PreDecision};
pub use record::{DeletionEvent, EVENT_RECORD_SIZE};
pub use subsystem::Subsystem;
