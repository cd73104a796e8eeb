use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use tracker_core::canonical::{canonicalize_with_base, CanonicalPath};
use tracker_core::identity::Requestor;
use tracker_core::intercept::{Completion, FileOperation, OperationKind, PreDecision};
use tracker_core::subsystem::Subsystem;

/// Filesystem front-end whose operations pass through the tracking hooks.
/// Relative paths resolve against the working directory captured at
/// construction.
pub struct GuardedFs {
    subsystem: Arc<Subsystem>,
    base: PathBuf,
    requestor: Requestor,
}

impl GuardedFs {
    pub fn new(subsystem: Arc<Subsystem>) -> io::Result<Self> {
        Ok(Self::with_base(subsystem, std::env::current_dir()?))
    }

    pub fn with_base(subsystem: Arc<Subsystem>, base: PathBuf) -> Self {
        Self {
            subsystem,
            base,
            requestor: Requestor::current(),
        }
    }

    pub fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.guarded(OperationKind::Delete, path, || std::fs::remove_file(path))
    }

    pub fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.guarded(OperationKind::Rename, from, || std::fs::rename(from, to))
    }

    pub fn create(&self, path: &Path) -> io::Result<File> {
        self.guarded(OperationKind::Create, path, || File::create(path))
    }

    /// Mark `path` for deletion. The deletion completes before this returns.
    pub fn set_delete_disposition(&self, path: &Path) -> io::Result<()> {
        let kind = OperationKind::SetMetadata {
            delete_disposition: true,
        };
        self.guarded(kind, path, || std::fs::remove_file(path))
    }

    fn guarded<T>(
        &self,
        kind: OperationKind,
        path: &Path,
        op: impl FnOnce() -> io::Result<T>,
    ) -> io::Result<T> {
        let target = self.resolve(path);
        let operation = FileOperation {
            kind,
            target: target.as_ref(),
            requestor: self.requestor,
        };
        let post_callback = match self.subsystem.pre_operation(&operation) {
            PreDecision::Deny => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{} is protected against deletion", path.display()),
                ))
            }
            PreDecision::Proceed { post_callback } => post_callback,
        };

        let result = op();
        if post_callback {
            let completion = match result {
                Ok(_) => Completion::Succeeded,
                Err(_) => Completion::Failed,
            };
            self.subsystem.post_operation(&operation, completion);
        }
        result
    }

    /// An unresolvable name lets the operation through untracked.
    fn resolve(&self, path: &Path) -> Option<CanonicalPath> {
        match canonicalize_with_base(path, &self.base) {
            Ok(p) => Some(p),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot canonicalize operation target");
                None
            }
        }
    }
}
