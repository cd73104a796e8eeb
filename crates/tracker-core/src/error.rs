use thiserror::Error;

use crate::canonical::PathError;

/// Failures while bringing the subsystem up or loading its configuration.
/// Nothing on the interception path returns this type.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not allocate {0}")]
    Allocation(&'static str),

    #[error("invalid path {path:?}: {source}")]
    Path {
        path: String,
        #[source]
        source: PathError,
    },

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
