//! Upload Transfer Target

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, DuplexStream};
use tracing::{debug, info};

use crate::error::{CatError, Result};
use crate::relay::Direction;

/// Outcome of a receive-to-file session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Confirmation line written back to the peer after a complete upload
pub fn acknowledgement(path: &Path) -> String {
    format!("Saved file {}\n", path.display())
}

struct PendingAck {
    writer: DuplexStream,
    message: Vec<u8>,
    written: usize,
}

/// Destination file for an upload.
///
/// Shutting it down flushes the file and then, if acknowledgement is on,
/// writes the confirmation line into the paired reader. Dropping it without a
/// shutdown, or shutting it down after a failed write, never produces a
/// confirmation.
pub struct TransferTarget {
    path: PathBuf,
    file: File,
    ack: Option<PendingAck>,
    failed: bool,
}

impl TransferTarget {
    /// Open `path` for writing. Without `overwrite` an existing file is an error.
    pub async fn create(path: &Path, overwrite: bool) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options.open(path).await.map_err(|source| CatError::Write {
            direction: Direction::Downstream,
            bytes: 0,
            source: io::Error::new(
                source.kind(),
                format!("cannot create {}: {}", path.display(), source),
            ),
        })?;
        info!("Receiving upload into {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            ack: None,
            failed: false,
        })
    }

    /// Pair the target with a reader that yields the confirmation line once
    /// the file has been flushed, then EOF.
    pub fn with_acknowledgement(mut self) -> (Self, DuplexStream) {
        let message = acknowledgement(&self.path).into_bytes();
        let (reader, writer) = tokio::io::duplex(message.len().max(64));
        self.ack = Some(PendingAck {
            writer,
            message,
            written: 0,
        });
        (self, reader)
    }

    fn record<T>(&mut self, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if let Poll::Ready(Err(e)) = &poll {
            debug!("Write to {} failed: {}", self.path.display(), e);
            self.failed = true;
        }
        poll
    }
}

impl AsyncWrite for TransferTarget {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.file).poll_write(cx, buf);
        self.record(poll)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.file).poll_flush(cx);
        self.record(poll)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.file).poll_shutdown(cx);
        ready!(self.record(poll))?;

        let this = &mut *self;
        if this.failed {
            // Incomplete file: end the acknowledgement stream without a line
            this.ack = None;
        }
        if let Some(ack) = this.ack.as_mut() {
            while ack.written < ack.message.len() {
                match ready!(Pin::new(&mut ack.writer).poll_write(cx, &ack.message[ack.written..])) {
                    Ok(0) => break,
                    Ok(n) => ack.written += n,
                    Err(e) => {
                        // Reader already gone; the file itself is complete
                        debug!("Upload acknowledgement not delivered: {}", e);
                        break;
                    }
                }
            }
            // Dropping the writer ends the acknowledgement stream
            this.ack = None;
        }

        Poll::Ready(Ok(()))
    }
}
