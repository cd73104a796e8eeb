//! Pre- and post-operation decisions for intercepted file operations.
//!
//! The interception framework calls [`Interceptor::pre_operation`] before the
//! filesystem acts and, for operations that were allowed and asked for it,
//! [`Interceptor::post_operation`] afterwards. Deleting a protected file is
//! denied up front. A completed deletion of any tracked file produces one
//! [`DeletionEvent`] on the queue.

use tracing::{debug, info, warn};

use crate::canonical::CanonicalPath;
use crate::context::Restricted;
use crate::identity::{IdentitySource, Requestor};
use crate::queue::{EventQueue, PushOutcome};
use crate::record::{
    DeletionEvent, FilePath, ProcessName, Timestamp, UNKNOWN_PROCESS, UNKNOWN_TIMESTAMP,
};
use crate::registry::{Protection, TrackedFileRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Rename,
    /// Metadata change. `delete_disposition` is set when the change marks the
    /// file for deletion (delete-on-close or an explicit delete disposition).
    SetMetadata { delete_disposition: bool },
    Delete,
}

impl OperationKind {
    pub fn is_deletion(self) -> bool {
        matches!(
            self,
            OperationKind::Delete
                | OperationKind::SetMetadata {
                    delete_disposition: true
                }
        )
    }
}

/// One intercepted operation as classified by the framework.
#[derive(Debug, Clone, Copy)]
pub struct FileOperation<'a> {
    pub kind: OperationKind,
    /// `None` when the framework could not resolve the target's name.
    pub target: Option<&'a CanonicalPath>,
    pub requestor: Requestor,
}

impl<'a> FileOperation<'a> {
    pub fn new(kind: OperationKind, target: &'a CanonicalPath, requestor: Requestor) -> Self {
        Self {
            kind,
            target: Some(target),
            requestor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreDecision {
    /// Fail the operation with access denied. No post-operation call follows.
    Deny,
    Proceed { post_callback: bool },
}

impl PreDecision {
    pub fn is_denied(self) -> bool {
        matches!(self, PreDecision::Deny)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Emitted(PushOutcome),
    Ignored,
}

pub struct Interceptor<'s> {
    registry: &'s TrackedFileRegistry,
    queue: &'s EventQueue,
    identity: &'s dyn IdentitySource,
}

impl<'s> Interceptor<'s> {
    pub fn new(
        registry: &'s TrackedFileRegistry,
        queue: &'s EventQueue,
        identity: &'s dyn IdentitySource,
    ) -> Self {
        Self {
            registry,
            queue,
            identity,
        }
    }

    pub fn pre_operation(&self, cx: &Restricted, op: &FileOperation<'_>) -> PreDecision {
        if !op.kind.is_deletion() {
            return PreDecision::Proceed {
                post_callback: false,
            };
        }
        let Some(target) = op.target else {
            return PreDecision::Proceed {
                post_callback: false,
            };
        };
        match self.registry.lookup(cx, target) {
            Some(Protection { protected: true }) => {
                warn!(path = %target, pid = ?op.requestor.pid, "blocked deletion of protected file");
                PreDecision::Deny
            }
            _ => PreDecision::Proceed {
                post_callback: true,
            },
        }
    }

    pub fn post_operation(
        &self,
        cx: &Restricted,
        op: &FileOperation<'_>,
        completion: Completion,
    ) -> PostAction {
        if !op.kind.is_deletion() || completion != Completion::Succeeded {
            return PostAction::Ignored;
        }
        let Some(target) = op.target else {
            return PostAction::Ignored;
        };
        if self.registry.lookup(cx, target).is_none() {
            debug!(path = %target, "deleted file is not tracked");
            return PostAction::Ignored;
        }

        let event = self.build_event(op.requestor, target);
        let outcome = self.queue.push(cx, event);
        match outcome {
            PushOutcome::Queued(seq) | PushOutcome::Overwrote(seq) => info!(
                seq,
                process = %event.process_name,
                path = %event.file_path,
                at = %event.timestamp,
                "tracked file deleted"
            ),
            PushOutcome::Rejected => {
                debug!(path = %event.file_path, "event queue full, deletion event dropped")
            }
        }
        PostAction::Emitted(outcome)
    }

    fn build_event(&self, requestor: Requestor, target: &CanonicalPath) -> DeletionEvent {
        let process_name = self
            .identity
            .process_name(requestor)
            .unwrap_or_else(|| ProcessName::new(UNKNOWN_PROCESS));
        let timestamp = self
            .identity
            .local_timestamp()
            .unwrap_or_else(|| Timestamp::new(UNKNOWN_TIMESTAMP));
        DeletionEvent::new(process_name, FilePath::new(target.as_str()), timestamp)
    }
}
