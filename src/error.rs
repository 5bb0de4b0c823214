//! Error Taxonomy
//!
//! Every failure the core can surface, grouped by the phase it happens in.
//! Each variant maps onto a stable process exit code.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::relay::Direction;

/// Exit code for a clean connection close
pub const EXIT_OK: i32 = 0;
/// Exit code for unexpected internal failures
pub const EXIT_INTERNAL: i32 = 1;
/// Exit code for invalid configuration (also used by clap for usage errors)
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for resolution, bind, accept, connect and timeout failures
pub const EXIT_ESTABLISH: i32 = 3;
/// Exit code for I/O failures while relaying
pub const EXIT_RELAY_IO: i32 = 4;
/// Exit code for a subprocess that could not be started
pub const EXIT_SUBPROCESS: i32 = 5;
/// Exit code after SIGINT/SIGTERM
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Error, Debug)]
pub enum CatError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to resolve {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept a connection on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout:?} connecting to {addr}")]
    Timeout { addr: String, timeout: Duration },

    #[error("read failed on {direction} after {bytes} bytes: {source}")]
    Read {
        direction: Direction,
        bytes: u64,
        #[source]
        source: io::Error,
    },

    #[error("write failed on {direction} after {bytes} bytes: {source}")]
    Write {
        direction: Direction,
        bytes: u64,
        #[source]
        source: io::Error,
    },

    #[error("transfer to {} incomplete after {bytes} bytes: {reason}", path.display())]
    IncompleteTransfer {
        path: PathBuf,
        bytes: u64,
        reason: String,
    },

    #[error("failed to start `{command}`: {source}")]
    Subprocess {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("interrupted by shutdown request")]
    Interrupted,
}

impl CatError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        CatError::Configuration(msg.into())
    }

    /// Whether the error happened before any connection existed
    pub fn is_establishment(&self) -> bool {
        matches!(
            self,
            CatError::Resolution { .. }
                | CatError::Bind { .. }
                | CatError::Accept { .. }
                | CatError::Connect { .. }
                | CatError::Timeout { .. }
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CatError::Configuration(_) => EXIT_CONFIG,
            e if e.is_establishment() => EXIT_ESTABLISH,
            CatError::Read { .. } | CatError::Write { .. } | CatError::IncompleteTransfer { .. } => {
                EXIT_RELAY_IO
            }
            CatError::Subprocess { .. } => EXIT_SUBPROCESS,
            CatError::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatError>;
