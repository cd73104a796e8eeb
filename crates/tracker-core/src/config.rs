use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::canonical::canonicalize;
use crate::error::TrackerError;
use crate::queue::OverflowPolicy;

/// Largest event queue the service will allocate.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// A file tracked from start, before any control request arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuiltinFile {
    pub path: String,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "default_max_tracked_files")]
    pub max_tracked_files: usize,
    #[serde(default)]
    pub builtin_files: Vec<BuiltinFile>,
    /// Directories the observe-only deletion watcher covers.
    #[serde(default)]
    pub watch_roots: Vec<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_max_tracked_files() -> usize {
    256
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            max_tracked_files: default_max_tracked_files(),
            builtin_files: vec![],
            watch_roots: vec![],
            log_filter: default_log_filter(),
        }
    }
}

impl TrackerConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(TrackerError::InvalidConfig(format!(
                "queue_capacity must be between 1 and {MAX_QUEUE_CAPACITY}"
            )));
        }
        if self.max_tracked_files == 0 {
            return Err(TrackerError::InvalidConfig(
                "max_tracked_files must be at least 1".into(),
            ));
        }
        if self.builtin_files.len() > self.max_tracked_files {
            return Err(TrackerError::InvalidConfig(format!(
                "{} builtin files exceed max_tracked_files ({})",
                self.builtin_files.len(),
                self.max_tracked_files
            )));
        }
        for file in &self.builtin_files {
            canonicalize(&file.path).map_err(|source| TrackerError::Path {
                path: file.path.clone(),
                source,
            })?;
        }
        for root in &self.watch_roots {
            if !root.is_absolute() {
                return Err(TrackerError::InvalidConfig(format!(
                    "watch root must be absolute: {}",
                    root.display()
                )));
            }
        }
        Ok(())
    }
}
