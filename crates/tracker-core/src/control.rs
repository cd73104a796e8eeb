//! Control requests from the user-mode client.
//!
//! Each request carries a path or a buffer length and returns one
//! [`ControlStatus`]. Paths are validated and canonicalized before the
//! registry sees them. Events are drained one at a time in FIFO order and
//! copied out in the fixed record layout.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::canonical::{canonicalize, CanonicalPath, MAX_PATH_LEN};
use crate::context::{ExecContext, Passive};
use crate::queue::{EventQueue, QueueStats};
use crate::record::{DeletionEvent, EVENT_RECORD_SIZE};
use crate::registry::{AddOutcome, RemoveOutcome, TrackedFileRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Ok,
    AlreadyTracked,
    NotFound,
    InvalidParameter,
    ResourceExhausted,
    NoEventsAvailable,
    BufferTooSmall,
}

impl ControlStatus {
    pub fn is_ok(self) -> bool {
        self == ControlStatus::Ok
    }
}

impl std::fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControlStatus::Ok => "ok",
            ControlStatus::AlreadyTracked => "file is already tracked",
            ControlStatus::NotFound => "file is not tracked",
            ControlStatus::InvalidParameter => "invalid parameter",
            ControlStatus::ResourceExhausted => "tracked file limit reached",
            ControlStatus::NoEventsAvailable => "no deletion events available",
            ControlStatus::BufferTooSmall => "buffer too small for an event record",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    AddTrackedFile { path: String, protected: bool },
    RemoveTrackedFile { path: String },
    GetDeleteEvent { buffer_len: usize },
    QueryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub tracked_files: usize,
    pub max_tracked_files: usize,
    pub queue: QueueStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Status(ControlStatus),
    /// One drained event in wire layout.
    Event(Vec<u8>),
    Tracker(TrackerStatus),
}

impl ControlResponse {
    pub fn status(&self) -> ControlStatus {
        match self {
            ControlResponse::Status(status) => *status,
            ControlResponse::Event(_) | ControlResponse::Tracker(_) => ControlStatus::Ok,
        }
    }
}

pub struct ControlHandler<'s> {
    registry: &'s TrackedFileRegistry,
    queue: &'s EventQueue,
}

impl<'s> ControlHandler<'s> {
    pub fn new(registry: &'s TrackedFileRegistry, queue: &'s EventQueue) -> Self {
        Self { registry, queue }
    }

    pub fn add_file(&self, cx: &Passive, path: &str, protected: bool) -> ControlStatus {
        let path = match validate_path(path) {
            Ok(p) => p,
            Err(status) => return status,
        };
        match self.registry.add(cx, &path, protected) {
            AddOutcome::Added => {
                info!(path = %path, protected, "tracking file");
                ControlStatus::Ok
            }
            AddOutcome::AlreadyTracked => {
                debug!(path = %path, "file already tracked");
                ControlStatus::AlreadyTracked
            }
            AddOutcome::ResourceExhausted => {
                warn!(
                    path = %path,
                    max = self.registry.max_entries(),
                    "tracked file limit reached"
                );
                ControlStatus::ResourceExhausted
            }
        }
    }

    pub fn remove_file(&self, cx: &Passive, path: &str) -> ControlStatus {
        let path = match validate_path(path) {
            Ok(p) => p,
            Err(status) => return status,
        };
        match self.registry.remove(cx, &path) {
            RemoveOutcome::Removed => {
                info!(path = %path, "stopped tracking file");
                ControlStatus::Ok
            }
            RemoveOutcome::NotFound => ControlStatus::NotFound,
        }
    }

    /// Pop the oldest event and write it into `buf`. A buffer shorter than one
    /// record is refused before anything is dequeued.
    pub fn drain_one_event(
        &self,
        cx: &Passive,
        buf: &mut [u8],
    ) -> Result<DeletionEvent, ControlStatus> {
        if buf.len() < EVENT_RECORD_SIZE {
            return Err(ControlStatus::BufferTooSmall);
        }
        let event = self.queue.pop(cx).ok_or(ControlStatus::NoEventsAvailable)?;
        event
            .encode_into(buf)
            .map_err(|_| ControlStatus::BufferTooSmall)?;
        Ok(event)
    }

    pub fn status(&self, cx: &impl ExecContext) -> TrackerStatus {
        TrackerStatus {
            tracked_files: self.registry.len(cx),
            max_tracked_files: self.registry.max_entries(),
            queue: self.queue.stats(cx),
        }
    }

    pub fn dispatch(&self, cx: &Passive, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::AddTrackedFile { path, protected } => {
                ControlResponse::Status(self.add_file(cx, &path, protected))
            }
            ControlRequest::RemoveTrackedFile { path } => {
                ControlResponse::Status(self.remove_file(cx, &path))
            }
            ControlRequest::GetDeleteEvent { buffer_len } => {
                if buffer_len < EVENT_RECORD_SIZE {
                    return ControlResponse::Status(ControlStatus::BufferTooSmall);
                }
                let mut record = [0u8; EVENT_RECORD_SIZE];
                match self.drain_one_event(cx, &mut record) {
                    Ok(_) => ControlResponse::Event(record.to_vec()),
                    Err(status) => ControlResponse::Status(status),
                }
            }
            ControlRequest::QueryStatus => ControlResponse::Tracker(self.status(cx)),
        }
    }
}

fn validate_path(path: &str) -> Result<CanonicalPath, ControlStatus> {
    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(ControlStatus::InvalidParameter);
    }
    canonicalize(path).map_err(|e| {
        debug!(error = %e, "rejected control path");
        ControlStatus::InvalidParameter
    })
}
