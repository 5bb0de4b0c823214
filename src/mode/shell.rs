//! Subprocess Backends
//!
//! Shell and execute modes only need "a process with writable input,
//! readable output and a terminate operation". `ShellBackend` hands those
//! out; `CommandShell` is the tokio process implementation.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use crate::error::{CatError, Result};

pub type LocalReader = Box<dyn AsyncRead + Unpin + Send>;
pub type LocalWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Program and arguments to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Whether the process gets a stdin pipe. Without one, stdin is null.
    pub interactive: bool,
}

impl ProcessSpec {
    /// Split a command line with POSIX shell quoting rules. No expansion or
    /// redirection happens; those need an interpreter.
    pub fn parse(command: &str, interactive: bool) -> Result<Self> {
        let words = shlex::split(command).ok_or_else(|| {
            CatError::config(format!("unbalanced quotes in command: {}", command))
        })?;
        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| CatError::config("no command given"))?;
        Ok(Self {
            program,
            args: words.collect(),
            interactive,
        })
    }

    /// Program and arguments joined back into one line, quoted where needed
    pub fn command_line(&self) -> String {
        let words: Vec<&str> = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect();
        // Only a NUL byte makes quoting fail
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Whether we had to kill it
    pub killed: bool,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.killed
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            killed: false,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.killed) {
            (_, true) => write!(f, "killed"),
            (Some(code), false) => write!(f, "exit code {}", code),
            (None, false) => write!(f, "terminated by signal"),
        }
    }
}

/// A running process the relay can talk to
#[async_trait]
pub trait ShellProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Writable end of the process input. `None` once taken or when not interactive.
    fn take_stdin(&mut self) -> Option<LocalWriter>;

    /// Readable process output. `None` once taken.
    fn take_output(&mut self) -> Option<LocalReader>;

    /// Close stdin, give the process `grace` to exit, then kill it. Always reaps.
    async fn terminate(&mut self, grace: Duration) -> io::Result<ProcessExit>;
}

/// Something that can start processes
pub trait ShellBackend: Send + Sync {
    fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ShellProcess>>;
}

/// Spawns real OS processes through `tokio::process`, stderr merged into stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandShell;

impl ShellBackend for CommandShell {
    fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ShellProcess>> {
        let command_line = spec.command_line();
        let spawn_error = |source: io::Error| CatError::Subprocess {
            command: command_line.clone(),
            source,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.interactive {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let missing = |what: &str| {
            spawn_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{} pipe unavailable", what),
            ))
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let stdin = child.stdin.take();

        let merged = ReaderStream::new(stdout).merge(ReaderStream::new(stderr));
        let output: LocalReader = Box::new(StreamReader::new(merged));

        info!("Started `{}` (pid {:?})", command_line, child.id());
        Ok(Box::new(ChildProcess {
            command_line,
            child,
            stdin,
            output: Some(output),
        }))
    }
}

struct ChildProcess {
    command_line: String,
    child: Child,
    stdin: Option<ChildStdin>,
    output: Option<LocalReader>,
}

#[async_trait]
impl ShellProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdin(&mut self) -> Option<LocalWriter> {
        self.stdin
            .take()
            .map(|stdin| Box::new(stdin) as LocalWriter)
    }

    fn take_output(&mut self) -> Option<LocalReader> {
        self.output.take()
    }

    async fn terminate(&mut self, grace: Duration) -> io::Result<ProcessExit> {
        self.stdin.take();

        if let Some(status) = self.child.try_wait()? {
            debug!("`{}` already exited: {}", self.command_line, status);
            return Ok(status.into());
        }

        match timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?.into()),
            Err(_) => {
                warn!(
                    "`{}` still running {:?} after its input closed, killing it",
                    self.command_line, grace
                );
                self.child.kill().await?;
                let status = self.child.wait().await?;
                Ok(ProcessExit {
                    code: status.code(),
                    killed: true,
                })
            }
        }
    }
}
