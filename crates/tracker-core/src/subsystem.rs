//! Lifecycle of the tracking subsystem.
//!
//! [`Subsystem::start`] allocates the registry and the event queue once and
//! installs the configured builtin files. The interception hooks and the
//! control handler borrow from it for as long as it lives.

use std::sync::Arc;
use tracing::{info, warn};

use crate::canonical::canonicalize;
use crate::config::TrackerConfig;
use crate::context::{Passive, Restricted};
use crate::control::ControlHandler;
use crate::error::TrackerError;
use crate::identity::IdentitySource;
use crate::intercept::{Completion, FileOperation, Interceptor, PostAction, PreDecision};
use crate::queue::EventQueue;
use crate::registry::{AddOutcome, TrackedFileRegistry};

pub struct Subsystem {
    registry: TrackedFileRegistry,
    queue: EventQueue,
    identity: Arc<dyn IdentitySource>,
}

/// What teardown released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub released_files: usize,
    pub discarded_events: usize,
}

impl Subsystem {
    pub fn start(
        config: &TrackerConfig,
        identity: Arc<dyn IdentitySource>,
    ) -> Result<Self, TrackerError> {
        config.validate()?;
        let registry = TrackedFileRegistry::with_capacity(config.max_tracked_files)?;
        let queue = EventQueue::new(config.queue_capacity, config.overflow_policy)?;

        Passive::enter(|cx| {
            for file in &config.builtin_files {
                let path = canonicalize(&file.path).map_err(|source| TrackerError::Path {
                    path: file.path.clone(),
                    source,
                })?;
                match registry.add(cx, &path, file.protected) {
                    AddOutcome::Added => {
                        info!(path = %path, protected = file.protected, "builtin tracked file")
                    }
                    AddOutcome::AlreadyTracked => {
                        warn!(path = %path, "duplicate builtin tracked file ignored")
                    }
                    AddOutcome::ResourceExhausted => {
                        return Err(TrackerError::InvalidConfig(
                            "builtin files exceed max_tracked_files".into(),
                        ))
                    }
                }
            }
            Ok::<_, TrackerError>(())
        })?;

        info!(
            queue_capacity = queue.capacity(),
            overflow_policy = ?queue.policy(),
            max_tracked_files = registry.max_entries(),
            "tracking subsystem started"
        );
        Ok(Self {
            registry,
            queue,
            identity,
        })
    }

    pub fn interceptor(&self) -> Interceptor<'_> {
        Interceptor::new(&self.registry, &self.queue, self.identity.as_ref())
    }

    pub fn control(&self) -> ControlHandler<'_> {
        ControlHandler::new(&self.registry, &self.queue)
    }

    /// Pre-operation hook, run as interception code.
    pub fn pre_operation(&self, op: &FileOperation<'_>) -> PreDecision {
        Restricted::enter(|cx| self.interceptor().pre_operation(cx, op))
    }

    /// Post-operation hook, run as interception code.
    pub fn post_operation(&self, op: &FileOperation<'_>, completion: Completion) -> PostAction {
        Restricted::enter(|cx| self.interceptor().post_operation(cx, op, completion))
    }

    /// Release every tracked entry and discard undelivered events. Hooks that
    /// run afterwards see an empty registry and emit nothing.
    pub fn shutdown(&self) -> ShutdownReport {
        Passive::enter(|cx| {
            let released_files = self.registry.clear(cx);
            let mut discarded_events = 0;
            while self.queue.pop(cx).is_some() {
                discarded_events += 1;
            }
            info!(released_files, discarded_events, "tracking subsystem stopped");
            ShutdownReport {
                released_files,
                discarded_events,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuiltinFile;
    use crate::identity::FixedIdentity;

    fn config_with(builtin: Vec<BuiltinFile>) -> TrackerConfig {
        TrackerConfig {
            builtin_files: builtin,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn start_installs_builtin_files() {
        let config = config_with(vec![
            BuiltinFile {
                path: "/etc/tracked.conf".into(),
                protected: true,
            },
            BuiltinFile {
                path: "/ETC/tracked.conf".into(),
                protected: false,
            },
        ]);
        let sub = Subsystem::start(&config, Arc::new(FixedIdentity::unavailable())).unwrap();
        let status = Passive::enter(|cx| sub.control().status(cx));
        assert_eq!(status.tracked_files, 1);
        assert_eq!(status.queue.capacity, 10);
    }

    #[test]
    fn invalid_config_fails_start() {
        let config = TrackerConfig {
            max_tracked_files: 0,
            ..TrackerConfig::default()
        };
        assert!(Subsystem::start(&config, Arc::new(FixedIdentity::unavailable())).is_err());
    }

    #[test]
    fn shutdown_releases_everything() {
        let sub = Subsystem::start(
            &TrackerConfig::default(),
            Arc::new(FixedIdentity::unavailable()),
        )
        .unwrap();
        Passive::enter(|cx| {
            sub.control().add_file(cx, "/w/a", false);
            sub.control().add_file(cx, "/w/b", true);
        });
        let report = sub.shutdown();
        assert_eq!(report.released_files, 2);
        assert_eq!(report.discarded_events, 0);
        let status = Passive::enter(|cx| sub.control().status(cx));
        assert_eq!(status.tracked_files, 0);
    }
}
