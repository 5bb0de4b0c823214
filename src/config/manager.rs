//! Configuration Manager

use super::{Behavior, Config, Role, SessionConfig, SessionRequest};
use crate::error::CatError;
use crate::mode::ProcessSpec;
use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;

/// Bind host used in listen mode when none is given
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// Loads tunables and resolves them, together with CLI flags, into a session
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::debug!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Apply environment variable overrides on top of `config`
    pub fn apply_env(mut config: Config) -> anyhow::Result<Config> {
        if let Ok(buffer_size) = std::env::var("RUSTCAT_BUFFER_SIZE") {
            config.relay.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RUSTCAT_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("RUSTCAT_CONNECT_TIMEOUT") {
            config.relay.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RUSTCAT_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(drain) = std::env::var("RUSTCAT_DRAIN_TIMEOUT") {
            config.relay.drain_timeout = Some(
                humantime::parse_duration(&drain)
                    .with_context(|| format!("Invalid RUSTCAT_DRAIN_TIMEOUT: {}", drain))?,
            );
        }

        if let Ok(shell) = std::env::var("RUSTCAT_SHELL") {
            config.shell.command = shell;
        }

        if let Ok(log_level) = std::env::var("RUSTCAT_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration: file (when given and present) over environment over defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let base = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            Some(path) => bail!("Config file not found: {}", path.display()),
            None => Config::default(),
        };
        Self::apply_env(base)
    }

    /// Turn raw CLI flags into an immutable session, rejecting invalid combinations
    pub fn resolve(config: Config, request: SessionRequest) -> Result<SessionConfig, CatError> {
        config
            .validate()
            .map_err(|e| CatError::config(format!("{:#}", e)))?;

        let selected = [
            request.shell.is_some(),
            request.execute.is_some(),
            request.upload.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if selected > 1 {
            return Err(CatError::config(
                "--shell, --execute and --upload are mutually exclusive",
            ));
        }

        let role = if request.listen { Role::Listen } else { Role::Connect };

        let host = match (role, request.host) {
            (_, Some(host)) if host.trim().is_empty() => {
                return Err(CatError::config("host must not be empty"))
            }
            (_, Some(host)) => host,
            (Role::Listen, None) => DEFAULT_LISTEN_HOST.to_string(),
            (Role::Connect, None) => {
                return Err(CatError::config("connect mode requires a target host"))
            }
        };

        let behavior = if let Some(shell) = request.shell {
            let command = if shell.trim().is_empty() {
                config.shell.command.clone()
            } else {
                shell
            };
            Behavior::Shell { command }
        } else if let Some(command) = request.execute {
            Behavior::Execute { command }
        } else if let Some(path) = request.upload {
            Behavior::Upload { path }
        } else {
            Behavior::Plain
        };

        let session = SessionConfig {
            host,
            port: request.port,
            role,
            behavior,
            relay: config.relay,
            shell: config.shell,
            upload: config.upload,
        };
        session.validate()?;
        Ok(session)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_shell_config()
            .with_context(|| "Shell configuration validation failed")?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            bail!("log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> anyhow::Result<()> {
        if self.relay.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.relay.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_shell_config(&self) -> anyhow::Result<()> {
        if self.shell.command.trim().is_empty() {
            bail!("shell.command must not be empty");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        buffer_size: Option<usize>,
        connect_timeout: Option<u64>,
        drain_timeout: Option<u64>,
        overwrite: bool,
        no_ack: bool,
        log_level: Option<&str>,
    ) {
        if let Some(buffer_size) = buffer_size {
            self.relay.buffer_size = buffer_size;
            tracing::debug!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(secs) = connect_timeout {
            self.relay.connect_timeout = Duration::from_secs(secs);
            tracing::debug!("CLI override: connect timeout set to {}s", secs);
        }

        if let Some(secs) = drain_timeout {
            self.relay.drain_timeout = Some(Duration::from_secs(secs));
            tracing::debug!("CLI override: drain timeout set to {}s", secs);
        }

        if overwrite {
            self.upload.overwrite = true;
        }

        if no_ack {
            self.upload.acknowledge = false;
        }

        if let Some(level) = log_level {
            self.log_level = level.to_string();
        }
    }
}

impl SessionConfig {
    /// Reject combinations that cannot work before any socket is touched
    pub fn validate(&self) -> Result<(), CatError> {
        if self.role == Role::Connect && self.port == 0 {
            return Err(CatError::config("connect mode requires a non-zero port"));
        }

        if self.relay.buffer_size == 0 {
            return Err(CatError::config("buffer_size must be greater than 0"));
        }

        match &self.behavior {
            Behavior::Plain => Ok(()),
            Behavior::Shell { command } | Behavior::Execute { command } => {
                validate_command(command)
            }
            Behavior::Upload { path } => validate_upload_path(path, self.upload.overwrite),
        }
    }
}

fn validate_command(command: &str) -> Result<(), CatError> {
    let spec = ProcessSpec::parse(command, false)?;
    let program = spec.program.as_str();

    // Bare names are looked up on PATH at spawn time
    if program.contains('/') && !Path::new(program).is_file() {
        return Err(CatError::config(format!("command not found: {}", program)));
    }

    Ok(())
}

fn validate_upload_path(path: &Path, overwrite: bool) -> Result<(), CatError> {
    if path.as_os_str().is_empty() {
        return Err(CatError::config("upload requires a destination path"));
    }

    // Paths that cannot be created at all surface as write errors when the file is opened
    if path.is_file() && !overwrite {
        return Err(CatError::config(format!(
            "upload destination already exists (use --force to overwrite): {}",
            path.display()
        )));
    }

    Ok(())
}
