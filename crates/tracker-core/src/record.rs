//! Deletion event records and their fixed wire layout.
//!
//! Records are copied by value into and out of the event queue and across the
//! control boundary, so every text field is an inline bounded buffer instead
//! of a heap string. Text longer than a field is truncated on a character
//! boundary; one byte of every field is reserved for the NUL terminator.
//!
//! Wire layout (all integers little-endian):
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 4    | sequence number (`u32`)       |
//! | 4      | 260  | process name, NUL padded      |
//! | 264    | 1024 | file path, NUL padded         |
//! | 1288   | 20   | `YYYY-MM-DD HH:MM:SS`, NUL    |

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const PROCESS_NAME_FIELD: usize = 260;
pub const FILE_PATH_FIELD: usize = 1024;
pub const TIMESTAMP_FIELD: usize = 20;

pub const EVENT_RECORD_SIZE: usize = 4 + PROCESS_NAME_FIELD + FILE_PATH_FIELD + TIMESTAMP_FIELD;

pub const UNKNOWN_PROCESS: &str = "Unknown Process";
pub const UNKNOWN_TIMESTAMP: &str = "0000-00-00 00:00:00";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    #[error("record truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("{0} field is not NUL terminated")]
    MissingTerminator(&'static str),
    #[error("{0} field is not valid UTF-8")]
    InvalidUtf8(&'static str),
}

/// Inline UTF-8 buffer holding at most `N - 1` bytes.
#[derive(Clone, Copy)]
pub struct FixedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

pub type ProcessName = FixedStr<PROCESS_NAME_FIELD>;
pub type FilePath = FixedStr<FILE_PATH_FIELD>;
pub type Timestamp = FixedStr<TIMESTAMP_FIELD>;

impl<const N: usize> FixedStr<N> {
    pub const EMPTY: Self = Self {
        buf: [0; N],
        len: 0,
        truncated: false,
    };

    pub const CAPACITY: usize = N - 1;

    /// Copy `s`, truncating if it does not fit.
    pub fn new(s: &str) -> Self {
        let mut out = Self::EMPTY;
        out.push_str(s);
        out
    }

    /// Append as much of `s` as fits.
    pub fn push_str(&mut self, s: &str) {
        let room = Self::CAPACITY - self.len;
        let mut end = s.len().min(room);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        if end < s.len() {
            self.truncated = true;
        }
        self.buf[self.len..self.len + end].copy_from_slice(&s.as_bytes()[..end]);
        self.len += end;
    }

    pub fn as_str(&self) -> &str {
        // Only whole characters are ever copied in.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether input was cut off to fit.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    fn write_field(&self, out: &mut [u8]) {
        out[..self.len].copy_from_slice(&self.buf[..self.len]);
        out[self.len..N].fill(0);
    }

    fn read_field(field: &[u8], name: &'static str) -> Result<Self, RecordError> {
        let len = field[..N]
            .iter()
            .position(|b| *b == 0)
            .ok_or(RecordError::MissingTerminator(name))?;
        let s = std::str::from_utf8(&field[..len]).map_err(|_| RecordError::InvalidUtf8(name))?;
        Ok(Self::new(s))
    }
}

impl<const N: usize> fmt::Write for FixedStr<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> PartialEq for FixedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for FixedStr<N> {}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One observed deletion of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletionEvent {
    /// Assigned by the queue on push; zero until then.
    pub sequence_id: u32,
    pub process_name: ProcessName,
    pub file_path: FilePath,
    pub timestamp: Timestamp,
}

impl DeletionEvent {
    pub const EMPTY: Self = Self {
        sequence_id: 0,
        process_name: ProcessName::EMPTY,
        file_path: FilePath::EMPTY,
        timestamp: Timestamp::EMPTY,
    };

    pub fn new(process_name: ProcessName, file_path: FilePath, timestamp: Timestamp) -> Self {
        Self {
            sequence_id: 0,
            process_name,
            file_path,
            timestamp,
        }
    }

    /// Write the wire record into `out`. Nothing is written when `out` is too
    /// small.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize, RecordError> {
        if out.len() < EVENT_RECORD_SIZE {
            return Err(RecordError::BufferTooSmall {
                needed: EVENT_RECORD_SIZE,
                got: out.len(),
            });
        }
        let (seq, rest) = out.split_at_mut(4);
        seq.copy_from_slice(&self.sequence_id.to_le_bytes());
        let (name, rest) = rest.split_at_mut(PROCESS_NAME_FIELD);
        self.process_name.write_field(name);
        let (path, rest) = rest.split_at_mut(FILE_PATH_FIELD);
        self.file_path.write_field(path);
        self.timestamp.write_field(&mut rest[..TIMESTAMP_FIELD]);
        Ok(EVENT_RECORD_SIZE)
    }

    pub fn to_bytes(&self) -> [u8; EVENT_RECORD_SIZE] {
        let mut out = [0u8; EVENT_RECORD_SIZE];
        // Cannot fail: the array is exactly one record long.
        let _ = self.encode_into(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < EVENT_RECORD_SIZE {
            return Err(RecordError::Truncated {
                needed: EVENT_RECORD_SIZE,
                got: bytes.len(),
            });
        }
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&bytes[..4]);
        let name_at = 4;
        let path_at = name_at + PROCESS_NAME_FIELD;
        let time_at = path_at + FILE_PATH_FIELD;
        Ok(Self {
            sequence_id: u32::from_le_bytes(seq),
            process_name: ProcessName::read_field(&bytes[name_at..path_at], "process name")?,
            file_path: FilePath::read_field(&bytes[path_at..time_at], "file path")?,
            timestamp: Timestamp::read_field(&bytes[time_at..EVENT_RECORD_SIZE], "timestamp")?,
        })
    }
}
