//! Mode Module
//!
//! Per-connection behaviors layered on top of the relay engine: plain
//! passthrough, shell relay, one-shot execute, and upload/receive.

pub mod controller;
pub mod shell;
pub mod upload;

pub use crate::config::Behavior;
pub use controller::{ModeController, SessionReport};
pub use shell::{CommandShell, LocalReader, LocalWriter, ProcessExit, ProcessSpec, ShellBackend, ShellProcess};
pub use upload::{TransferTarget, UploadReport};
