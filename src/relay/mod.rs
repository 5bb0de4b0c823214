//! Data Relay Module
//!
//! Handles bidirectional data relay between a connection and local streams.

pub mod engine;
pub mod session;

use std::fmt;

pub use engine::{DirectionEnd, RelayEngine, RelayOptions, RelaySummary, Termination};
pub use session::{ConnectionStats, RelaySession};

/// One of the two copy directions of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local input -> connection
    Upstream,
    /// Connection -> local output
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "local->remote"),
            Direction::Downstream => write!(f, "remote->local"),
        }
    }
}
