//! Acting-process and wall-clock lookup for deletion events.
//!
//! Both lookups are best effort. A `None` is replaced by a placeholder when
//! the event is built; it never stops the event from being queued.

use chrono::Local;
use std::fmt::Write as _;

use crate::record::{FixedStr, ProcessName, Timestamp, TIMESTAMP_FORMAT};

/// The process on whose behalf an intercepted operation runs, as reported by
/// the interception framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Requestor {
    pub pid: Option<u32>,
}

impl Requestor {
    pub const UNKNOWN: Self = Self { pid: None };

    pub fn pid(pid: u32) -> Self {
        Self { pid: Some(pid) }
    }

    pub fn current() -> Self {
        Self::pid(std::process::id())
    }
}

/// Source of the process name and timestamp stamped on each event.
///
/// Both methods are called from the post-operation hook inside a
/// [`Restricted`](crate::context::Restricted) scope. Implementations must
/// return in bounded time and must not allocate on the heap.
pub trait IdentitySource: Send + Sync {
    fn process_name(&self, requestor: Requestor) -> Option<ProcessName>;
    fn local_timestamp(&self) -> Option<Timestamp>;
}

/// Identity from the running system.
///
/// The service's own name is resolved once by [`SystemIdentity::new`]. Other
/// processes are named from `/proc/<pid>/comm` on Linux, read into stack
/// buffers; elsewhere they stay unknown.
#[derive(Debug, Clone, Copy)]
pub struct SystemIdentity {
    own_pid: u32,
    own_name: Option<ProcessName>,
}

impl SystemIdentity {
    /// Must be called from ordinary context. Also loads the local time zone
    /// so that later timestamps read it from chrono's cache.
    pub fn new() -> Self {
        let own_pid = std::process::id();
        let own_name = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name()?.to_str().map(ProcessName::new));
        let _ = Local::now();
        Self { own_pid, own_name }
    }
}

impl Default for SystemIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn proc_comm(pid: u32) -> Option<ProcessName> {
    use std::io::Read;

    let mut path = FixedStr::<32>::EMPTY;
    write!(path, "/proc/{pid}/comm").ok()?;
    if path.was_truncated() {
        return None;
    }
    let mut file = std::fs::File::open(path.as_str()).ok()?;
    let mut buf = [0u8; 64];
    let n = file.read(&mut buf).ok()?;
    let name = std::str::from_utf8(&buf[..n]).ok()?.trim_end();
    if name.is_empty() {
        return None;
    }
    Some(ProcessName::new(name))
}

impl IdentitySource for SystemIdentity {
    fn process_name(&self, requestor: Requestor) -> Option<ProcessName> {
        let pid = requestor.pid?;
        #[cfg(target_os = "linux")]
        {
            if let Some(name) = proc_comm(pid) {
                return Some(name);
            }
        }
        if pid == self.own_pid {
            return self.own_name;
        }
        None
    }

    fn local_timestamp(&self) -> Option<Timestamp> {
        let mut ts = Timestamp::EMPTY;
        write!(ts, "{}", Local::now().format(TIMESTAMP_FORMAT)).ok()?;
        Some(ts)
    }
}

/// Fixed answers, for tests and replay tools.
#[derive(Debug, Clone, Default)]
pub struct FixedIdentity {
    pub process_name: Option<String>,
    pub timestamp: Option<String>,
}

impl FixedIdentity {
    pub fn new(process_name: &str, timestamp: &str) -> Self {
        Self {
            process_name: Some(process_name.to_string()),
            timestamp: Some(timestamp.to_string()),
        }
    }

    /// Every lookup fails.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

impl IdentitySource for FixedIdentity {
    fn process_name(&self, _requestor: Requestor) -> Option<ProcessName> {
        self.process_name.as_deref().map(ProcessName::new)
    }

    fn local_timestamp(&self) -> Option<Timestamp> {
        self.timestamp.as_deref().map(Timestamp::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_timestamp_has_fixed_shape() {
        let ts = SystemIdentity::new().local_timestamp().unwrap();
        let s = ts.as_str();
        assert_eq!(s.len(), 19);
        assert_eq!(&s[4..5], "-");
        assert_eq!(&s[10..11], " ");
        assert_eq!(&s[13..14], ":");
        assert!(!ts.was_truncated());
    }

    #[test]
    fn unknown_requestor_has_no_name() {
        assert!(SystemIdentity::new().process_name(Requestor::UNKNOWN).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_is_named() {
        let name = SystemIdentity::new()
            .process_name(Requestor::current())
            .unwrap();
        assert!(!name.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn other_process_is_named_from_proc() {
        let identity = SystemIdentity::new();
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        // comm changes at exec
        let mut name = None;
        for _ in 0..100 {
            name = identity.process_name(Requestor::pid(child.id()));
            if name.map(|n| n.as_str() == "sleep").unwrap_or(false) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(name.unwrap().as_str(), "sleep");
    }

    #[test]
    fn missing_process_has_no_name() {
        let identity = SystemIdentity::new();
        assert!(identity.process_name(Requestor::pid(u32::MAX)).is_none());
    }
}
