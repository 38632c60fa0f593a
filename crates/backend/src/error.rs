use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = ReplayError> = std::result::Result<T, E>;

/// Errors raised while loading a simulation trace and its sources.
///
/// All of these are fatal to the session: the adapter reports them as a
/// diagnostic and terminates.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The simulate response (or an embedded source map) does not have the
    /// shape the replay engine needs.
    #[error("malformed simulation trace: {0}")]
    BadTrace(String),

    /// A program executed somewhere in the trace has no entry in the
    /// sources descriptor.
    #[error("no source registered for program hash {hash}")]
    MissingSource { hash: String },

    /// A referenced file could not be read.
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReplayError {
    pub fn bad_trace(msg: impl Into<String>) -> Self {
        Self::BadTrace(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
