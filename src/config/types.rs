//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables loaded from the config file and environment
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub shell: ShellConfig,
    pub upload: UploadConfig,
    pub log_level: String,
}

/// Relay engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Once one direction has ended cleanly, the other gets at most this long
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Option<Duration>,
}

/// Shell and execute mode configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Interpreter used when `--shell` is given without a value
    pub command: String,
    #[serde(with = "humantime_serde")]
    pub terminate_grace: Duration,
}

/// Upload/receive mode configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    pub overwrite: bool,
    pub acknowledge: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            shell: ShellConfig::default(),
            upload: UploadConfig::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            connect_timeout: Duration::from_secs(10),
            drain_timeout: None,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: "/bin/sh".to_string(),
            terminate_grace: Duration::from_secs(2),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            acknowledge: true,
        }
    }
}

/// Whether this invocation accepts or dials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listen,
    Connect,
}

/// What happens on an established connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Operator stdin/stdout <-> connection
    Plain,
    /// Interactive interpreter stdin/stdout <-> connection
    Shell { command: String },
    /// One-shot command whose output is sent to the peer
    Execute { command: String },
    /// Connection -> file
    Upload { path: PathBuf },
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::Plain => write!(f, "plain relay"),
            Behavior::Shell { command } => write!(f, "shell relay ({})", command),
            Behavior::Execute { command } => write!(f, "execute ({})", command),
            Behavior::Upload { path } => write!(f, "upload to {}", path.display()),
        }
    }
}

/// Raw, unvalidated session flags as handed over by the argument parser
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub host: Option<String>,
    pub port: u16,
    pub listen: bool,
    /// `Some("")` means "use the configured default interpreter"
    pub shell: Option<String>,
    pub execute: Option<String>,
    pub upload: Option<PathBuf>,
}

/// Fully resolved parameters for one invocation. Never mutated by the core.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub role: Role,
    pub behavior: Behavior,
    pub relay: RelayConfig,
    pub shell: ShellConfig,
    pub upload: UploadConfig,
}

impl SessionConfig {
    /// `host:port` as used for binding or dialing
    pub fn address(&self) -> String {
        crate::connection::join_host_port(&self.host, self.port)
    }
}
