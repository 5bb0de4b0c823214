//! rustcat Library
//!
//! A netcat-style TCP relay: one connection per invocation, dialed or
//! accepted, relayed to stdio, an interactive interpreter, a one-shot
//! command, or a file.

pub mod config;
pub mod connection;
pub mod error;
pub mod mode;
pub mod relay;
pub mod shutdown;

pub use config::{Config, SessionConfig};
pub use connection::Connection;
pub use error::{CatError, Result};
pub use mode::ModeController;
pub use relay::RelayEngine;
pub use shutdown::ShutdownCoordinator;
