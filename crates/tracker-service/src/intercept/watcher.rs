use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use tracker_core::canonical::canonicalize_path;
use tracker_core::identity::Requestor;
use tracker_core::intercept::{Completion, FileOperation, OperationKind};
use tracker_core::subsystem::Subsystem;

/// Reports deletions seen by the OS change notifier. Deletions already
/// happened when they are reported, so nothing can be denied here and the
/// acting process is unknown.
pub struct DeletionWatcher {
    watcher: Option<RecommendedWatcher>,
    bridge: Option<JoinHandle<()>>,
}

impl DeletionWatcher {
    pub fn start(subsystem: Arc<Subsystem>, roots: &[PathBuf]) -> Result<Self> {
        let (sync_tx, sync_rx) = mpsc::channel::<Result<Event, notify::Error>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = sync_tx.send(res);
            },
            Config::default(),
        )?;

        for root in roots {
            if root.exists() {
                watcher.watch(root, RecursiveMode::Recursive)?;
                info!(root = %root.display(), "watching for deletions");
            } else {
                warn!(root = %root.display(), "watch root does not exist");
            }
        }

        let bridge = std::thread::Builder::new()
            .name("deletion-watcher-bridge".into())
            .spawn(move || loop {
                match sync_rx.recv() {
                    Ok(Ok(event)) => {
                        for path in removed_paths(&event) {
                            report_removal(&subsystem, path);
                        }
                    }
                    Ok(Err(e)) => error!(error = %e, "file watcher error"),
                    Err(_) => {
                        debug!("watcher channel closed");
                        return;
                    }
                }
            })?;

        Ok(Self {
            watcher: Some(watcher),
            bridge: Some(bridge),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the watcher drops its sender, which ends the bridge loop.
        self.watcher.take();
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.join();
        }
    }
}

impl Drop for DeletionWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn removed_paths(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Remove(_) => event.paths.as_slice(),
        _ => &[],
    }
}

fn report_removal(subsystem: &Subsystem, path: &PathBuf) {
    let target = match canonicalize_path(path) {
        Ok(p) => p,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring removal of unusable path");
            return;
        }
    };
    let op = FileOperation::new(OperationKind::Delete, &target, Requestor::UNKNOWN);
    subsystem.post_operation(&op, Completion::Succeeded);
}
