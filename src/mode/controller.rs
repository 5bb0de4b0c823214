//! Mode Controller
//!
//! Picks the local endpoints for a connection from the session's behavior,
//! runs the relay over them, and tears down whatever it started.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use super::shell::{CommandShell, LocalReader, ProcessExit, ProcessSpec, ShellBackend};
use super::upload::{TransferTarget, UploadReport};
use crate::config::{Behavior, Role, SessionConfig};
use crate::connection::{self, Connection, Listener};
use crate::error::{CatError, Result};
use crate::relay::{ConnectionStats, Direction, DirectionEnd, RelayEngine, RelayOptions, Termination};

/// What a finished session did
#[derive(Debug)]
pub enum SessionReport {
    Relayed(ConnectionStats),
    Shell {
        stats: ConnectionStats,
        exit: Option<ProcessExit>,
    },
    Executed {
        stats: ConnectionStats,
        exit: Option<ProcessExit>,
    },
    Uploaded(UploadReport),
}

/// Runs one session according to its configuration
pub struct ModeController {
    config: SessionConfig,
    backend: Arc<dyn ShellBackend>,
}

impl ModeController {
    /// Validate `config` and build a controller that spawns real processes
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(CommandShell))
    }

    /// Same as `new` with a custom subprocess backend
    pub fn with_backend(config: SessionConfig, backend: Arc<dyn ShellBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    /// Establish the connection, then handle it. A shutdown request during
    /// establishment aborts with `Interrupted`.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<SessionReport> {
        let establish = self.establish();
        tokio::pin!(establish);

        let connection = tokio::select! {
            res = &mut establish => res?,
            res = shutdown.recv() => match res {
                Err(broadcast::error::RecvError::Closed) => establish.await?,
                _ => return Err(CatError::Interrupted),
            },
        };
        self.handle(connection, shutdown).await
    }

    /// Listen-and-accept or resolve-and-connect, per the session role
    pub async fn establish(&self) -> Result<Connection> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        match self.config.role {
            Role::Listen => Listener::bind(host, port).await?.accept_one().await,
            Role::Connect => connection::connect(host, port, self.config.relay.connect_timeout).await,
        }
    }

    /// Run the configured behavior over an established connection
    #[instrument(skip(self, connection, shutdown), fields(peer = %connection.peer_addr(), behavior = %self.config.behavior))]
    pub async fn handle(
        &self,
        connection: Connection,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionReport> {
        info!("Handling connection {} as {}", connection, self.config.behavior);
        match &self.config.behavior {
            Behavior::Plain => self.run_plain(connection, shutdown).await,
            Behavior::Shell { command } => self.run_shell(command, connection, shutdown).await,
            Behavior::Execute { command } => self.run_execute(command, connection, shutdown).await,
            Behavior::Upload { path } => self.run_upload(path, connection, shutdown).await,
        }
    }

    fn relay_options(&self) -> RelayOptions {
        RelayOptions::from_config(&self.config.relay)
    }

    async fn run_plain(
        &self,
        connection: Connection,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionReport> {
        let engine = RelayEngine::new(self.relay_options());
        let summary = engine
            .relay(connection, Some(tokio::io::stdin()), tokio::io::stdout(), shutdown)
            .await;
        Ok(SessionReport::Relayed(summary.check()?))
    }

    async fn run_shell(
        &self,
        command: &str,
        connection: Connection,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionReport> {
        let grace = self.config.shell.terminate_grace;
        let spec = ProcessSpec::parse(command, true)?;
        let mut process = self.backend.spawn(&spec)?;

        let io = process.take_stdin().zip(process.take_output());
        let Some((stdin, output)) = io else {
            let _ = process.terminate(Duration::ZERO).await;
            return Err(subprocess_pipes_missing(&spec));
        };

        // Once the interpreter's output ends it has exited; peer input has nowhere to go
        let options = self
            .relay_options()
            .with_local_drain(Some(self.config.relay.drain_timeout.unwrap_or(grace)));
        let summary = RelayEngine::new(options)
            .relay(connection, Some(output), stdin, shutdown)
            .await;

        let exit = reap(process.terminate(grace).await, &spec);
        let stats = summary.check()?;
        Ok(SessionReport::Shell { stats, exit })
    }

    async fn run_execute(
        &self,
        command: &str,
        connection: Connection,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionReport> {
        let spec = ProcessSpec::parse(command, false)?;
        let mut process = self.backend.spawn(&spec)?;

        let Some(output) = process.take_output() else {
            let _ = process.terminate(Duration::ZERO).await;
            return Err(subprocess_pipes_missing(&spec));
        };

        // Close as soon as the command output has been sent; peer input is discarded
        let options = self
            .relay_options()
            .with_local_drain(Some(Duration::ZERO))
            .with_remote_drain(None);
        let summary = RelayEngine::new(options)
            .relay(connection, Some(output), tokio::io::sink(), shutdown)
            .await;

        let exit = reap(
            process.terminate(self.config.shell.terminate_grace).await,
            &spec,
        );
        let stats = summary.check()?;
        Ok(SessionReport::Executed { stats, exit })
    }

    async fn run_upload(
        &self,
        path: &Path,
        connection: Connection,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionReport> {
        let target = TransferTarget::create(path, self.config.upload.overwrite).await?;
        let (target, ack) = if self.config.upload.acknowledge {
            let (target, ack) = target.with_acknowledgement();
            (target, Some(Box::new(ack) as LocalReader))
        } else {
            (target, None)
        };

        // The transfer ends only when the peer finishes sending
        let options = self.relay_options().with_remote_drain(None);
        let summary = RelayEngine::new(options)
            .relay(connection, ack, target, shutdown)
            .await;

        let bytes = summary.stats.bytes_received;
        let incomplete = |reason: String| {
            warn!("Partial upload of {} bytes left at {}", bytes, path.display());
            CatError::IncompleteTransfer {
                path: path.to_path_buf(),
                bytes,
                reason,
            }
        };

        match (summary.termination, summary.downstream) {
            (_, DirectionEnd::WriteFailed(source)) => {
                error!("Writing {} failed after {} bytes", path.display(), bytes);
                Err(CatError::Write {
                    direction: Direction::Downstream,
                    bytes,
                    source,
                })
            }
            (_, DirectionEnd::ReadFailed(source)) => {
                Err(incomplete(format!("connection failed: {}", source)))
            }
            (_, DirectionEnd::Eof) => {
                if !summary.upstream.is_clean() {
                    warn!("Upload acknowledgement was not delivered: {:?}", summary.upstream);
                }
                info!("Saved {} bytes to {}", bytes, path.display());
                Ok(SessionReport::Uploaded(UploadReport {
                    path: path.to_path_buf(),
                    bytes,
                }))
            }
            (Termination::Cancelled, _) => Err(incomplete("interrupted".to_string())),
            (_, other) => Err(incomplete(format!("stream ended early ({:?})", other))),
        }
    }
}

fn reap(result: std::io::Result<ProcessExit>, spec: &ProcessSpec) -> Option<ProcessExit> {
    match result {
        Ok(exit) => {
            info!("`{}` finished: {}", spec.command_line(), exit);
            Some(exit)
        }
        Err(e) => {
            warn!("Failed to reap `{}`: {}", spec.command_line(), e);
            None
        }
    }
}

fn subprocess_pipes_missing(spec: &ProcessSpec) -> CatError {
    CatError::Subprocess {
        command: spec.command_line(),
        source: std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "backend did not provide stdio pipes",
        ),
    }
}
