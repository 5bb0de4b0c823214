//! Relay Engine

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use super::{ConnectionStats, Direction, RelaySession};
use crate::config::RelayConfig;
use crate::connection::state::{self, CloseSignal};
use crate::connection::Connection;
use crate::error::CatError;

/// Tunables for one relay
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Size of each direction's copy buffer
    pub buffer_size: usize,
    /// After local input hits EOF, how long remote->local may keep running
    pub drain_after_local_eof: Option<Duration>,
    /// After the peer hits EOF, how long local->remote may keep running
    pub drain_after_remote_eof: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            drain_after_local_eof: None,
            drain_after_remote_eof: None,
        }
    }
}

impl RelayOptions {
    /// Buffer size from config, with `drain_timeout` applied to both sides
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            drain_after_local_eof: config.drain_timeout,
            drain_after_remote_eof: config.drain_timeout,
        }
    }

    /// Override how long remote->local may run once local input has ended
    pub fn with_local_drain(mut self, limit: Option<Duration>) -> Self {
        self.drain_after_local_eof = limit;
        self
    }

    /// Override how long local->remote may run once the peer has ended
    pub fn with_remote_drain(mut self, limit: Option<Duration>) -> Self {
        self.drain_after_remote_eof = limit;
        self
    }

    fn drain_after(&self, direction: Direction) -> Option<Duration> {
        match direction {
            Direction::Upstream => self.drain_after_local_eof,
            Direction::Downstream => self.drain_after_remote_eof,
        }
    }
}

/// How one direction of a relay stopped
#[derive(Debug)]
pub enum DirectionEnd {
    /// Source reached EOF and the sink was flushed and shut down
    Eof,
    /// Direction never ran (input disabled)
    Disabled,
    /// Stopped because the connection was torn down
    Aborted,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

impl DirectionEnd {
    /// Reached EOF or never ran
    pub fn is_clean(&self) -> bool {
        matches!(self, DirectionEnd::Eof | DirectionEnd::Disabled)
    }

    /// A read or write error ended the direction
    pub fn is_failure(&self) -> bool {
        matches!(self, DirectionEnd::ReadFailed(_) | DirectionEnd::WriteFailed(_))
    }
}

/// How the relay as a whole ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Both directions finished, or one finished and the other was cut off after draining
    Clean,
    /// A shutdown request tore the relay down
    Cancelled,
    /// A read or write failed
    Failed,
}

/// Outcome of one relay
#[derive(Debug)]
pub struct RelaySummary {
    pub stats: ConnectionStats,
    pub upstream: DirectionEnd,
    pub downstream: DirectionEnd,
    pub termination: Termination,
}

impl RelaySummary {
    /// Whether the relay ended without error or cancellation
    pub fn is_clean(&self) -> bool {
        self.termination == Termination::Clean
    }

    /// Stats on a clean relay, otherwise the error that ended it
    pub fn check(self) -> Result<ConnectionStats, CatError> {
        match self.termination {
            Termination::Clean => Ok(self.stats),
            Termination::Cancelled => Err(CatError::Interrupted),
            Termination::Failed => {
                let stats = self.stats;
                let ends = [
                    (Direction::Upstream, self.upstream, stats.bytes_sent),
                    (Direction::Downstream, self.downstream, stats.bytes_received),
                ];
                for (direction, end, bytes) in ends {
                    match end {
                        DirectionEnd::ReadFailed(source) => {
                            return Err(CatError::Read { direction, bytes, source })
                        }
                        DirectionEnd::WriteFailed(source) => {
                            return Err(CatError::Write { direction, bytes, source })
                        }
                        _ => {}
                    }
                }
                Err(CatError::Read {
                    direction: Direction::Downstream,
                    bytes: stats.bytes_received,
                    source: io::Error::new(io::ErrorKind::Other, "relay failed"),
                })
            }
        }
    }
}

/// Moves bytes between a connection and a pair of local streams
pub struct RelayEngine {
    options: RelayOptions,
}

impl RelayEngine {
    /// Create an engine that relays with `options`
    pub fn new(options: RelayOptions) -> Self {
        Self { options }
    }

    /// Relay until both directions are done, one fails, or `shutdown` fires.
    ///
    /// `input: None` disables the local->remote direction; the connection's
    /// write side is half-closed straight away. A sink is shut down only after
    /// its source reached EOF; a failed or aborted direction drops it instead.
    /// The connection is closed when this returns.
    pub async fn relay<I, O>(
        &self,
        connection: Connection,
        input: Option<I>,
        output: O,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RelaySummary
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let session = Arc::new(RelaySession::new(
            connection.local_addr(),
            connection.peer_addr(),
        ));
        info!("Starting relay session {} ({})", session.session_id, connection);

        let signal = CloseSignal::new();
        let (net_reader, net_writer) = connection.into_split();
        let buffer_size = self.options.buffer_size;

        let mut upstream = match input {
            Some(input) => tokio::spawn(pump(
                Direction::Upstream,
                input,
                net_writer,
                buffer_size,
                Arc::clone(&session),
                signal.clone(),
            )),
            None => tokio::spawn(disabled(net_writer, signal.clone())),
        };
        let mut downstream = tokio::spawn(pump(
            Direction::Downstream,
            net_reader,
            output,
            buffer_size,
            Arc::clone(&session),
            signal.clone(),
        ));

        let mut up_end: Option<DirectionEnd> = None;
        let mut down_end: Option<DirectionEnd> = None;
        let mut drain_deadline: Option<Instant> = None;
        let mut listening = true;
        let mut cancelled = false;

        while up_end.is_none() || down_end.is_none() {
            tokio::select! {
                res = &mut upstream, if up_end.is_none() => {
                    let end = joined(Direction::Upstream, res);
                    if down_end.is_none() {
                        self.after_direction_end(Direction::Upstream, &end, &signal, &mut drain_deadline);
                    }
                    up_end = Some(end);
                }
                res = &mut downstream, if down_end.is_none() => {
                    let end = joined(Direction::Downstream, res);
                    if up_end.is_none() {
                        self.after_direction_end(Direction::Downstream, &end, &signal, &mut drain_deadline);
                    }
                    down_end = Some(end);
                }
                _ = sleep_until(drain_deadline.unwrap_or_else(Instant::now)), if drain_deadline.is_some() => {
                    debug!("Drain timeout reached for session {}, closing", session.session_id);
                    drain_deadline = None;
                    signal.close();
                }
                res = shutdown.recv(), if listening => {
                    listening = false;
                    match res {
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Shutdown channel closed, relay continues unsupervised");
                        }
                        _ => {
                            info!("Shutdown requested, tearing down session {}", session.session_id);
                            cancelled = true;
                            signal.close();
                        }
                    }
                }
            }
        }

        let upstream = up_end.unwrap_or(DirectionEnd::Aborted);
        let downstream = down_end.unwrap_or(DirectionEnd::Aborted);

        let termination = if cancelled {
            Termination::Cancelled
        } else if upstream.is_failure() || downstream.is_failure() {
            Termination::Failed
        } else {
            Termination::Clean
        };

        session.log_stats();
        match termination {
            Termination::Clean => info!(
                "Relay session {} closed cleanly: {} bytes sent, {} bytes received in {:?}",
                session.session_id,
                session.bytes_sent(),
                session.bytes_received(),
                session.duration()
            ),
            Termination::Cancelled => warn!(
                "Relay session {} cancelled after {:?}",
                session.session_id,
                session.duration()
            ),
            Termination::Failed => error!(
                "Relay session {} failed (upstream: {:?}, downstream: {:?})",
                session.session_id, upstream, downstream
            ),
        }

        RelaySummary {
            stats: session.to_stats(),
            upstream,
            downstream,
            termination,
        }
    }

    fn after_direction_end(
        &self,
        direction: Direction,
        end: &DirectionEnd,
        signal: &CloseSignal,
        drain_deadline: &mut Option<Instant>,
    ) {
        debug!("Direction {} ended: {:?}", direction, end);
        if end.is_failure() {
            signal.close();
        } else if matches!(end, DirectionEnd::Eof) {
            if let Some(limit) = self.options.drain_after(direction) {
                *drain_deadline = Some(Instant::now() + limit);
            }
        }
    }
}

fn joined(direction: Direction, res: Result<DirectionEnd, JoinError>) -> DirectionEnd {
    res.unwrap_or_else(|e| {
        error!("Relay task for {} did not complete: {}", direction, e);
        DirectionEnd::ReadFailed(io::Error::new(io::ErrorKind::Other, e.to_string()))
    })
}

/// Local input disabled: half-close the connection's write side and stop
async fn disabled<W>(mut writer: W, signal: CloseSignal) -> DirectionEnd
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = writer.shutdown().await {
        debug!("Half-close of disabled direction failed: {}", e);
    }
    signal.half_close(Direction::Upstream);
    DirectionEnd::Disabled
}

/// Copy `src` into `dst` one bounded buffer at a time until EOF, error, or close
async fn pump<R, W>(
    direction: Direction,
    mut src: R,
    mut dst: W,
    buffer_size: usize,
    session: Arc<RelaySession>,
    signal: CloseSignal,
) -> DirectionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut close_rx = signal.subscribe();
    let mut buf = vec![0u8; buffer_size.max(1)];

    let end = loop {
        let n = tokio::select! {
            biased;
            _ = state::closed(&mut close_rx) => break DirectionEnd::Aborted,
            res = src.read(&mut buf) => match res {
                Ok(0) => break DirectionEnd::Eof,
                Ok(n) => n,
                Err(e) => break DirectionEnd::ReadFailed(e),
            },
        };

        tokio::select! {
            biased;
            _ = state::closed(&mut close_rx) => break DirectionEnd::Aborted,
            res = dst.write_all(&buf[..n]) => {
                if let Err(e) = res {
                    break DirectionEnd::WriteFailed(e);
                }
            }
        }
        session.add_bytes(direction, n as u64);
    };

    match end {
        DirectionEnd::Eof => {
            let finished = tokio::select! {
                biased;
                _ = state::closed(&mut close_rx) => DirectionEnd::Aborted,
                res = finish(&mut dst) => match res {
                    Ok(()) => DirectionEnd::Eof,
                    Err(e) => DirectionEnd::WriteFailed(e),
                },
            };
            if matches!(finished, DirectionEnd::Eof) {
                debug!("Direction {} reached EOF after {} bytes", direction, session.bytes(direction));
                signal.half_close(direction);
            }
            finished
        }
        other => {
            // Only a clean EOF shuts the sink down; on any other end it is just dropped
            debug!("Dropping sink for {} after {:?}", direction, other);
            drop(dst);
            other
        }
    }
}

async fn finish<W>(dst: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    dst.flush().await?;
    dst.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> ConnectionStats {
        ConnectionStats {
            session_id: "relay_test".to_string(),
            local_addr: "127.0.0.1:1".parse().unwrap(),
            peer_addr: "127.0.0.1:2".parse().unwrap(),
            duration: Duration::from_millis(5),
            bytes_sent: 10,
            bytes_received: 20,
        }
    }

    #[test]
    fn test_clean_summary_yields_stats() {
        let summary = RelaySummary {
            stats: stats(),
            upstream: DirectionEnd::Eof,
            downstream: DirectionEnd::Eof,
            termination: Termination::Clean,
        };
        assert!(summary.is_clean());
        assert_eq!(summary.check().unwrap().total_bytes(), 30);
    }

    #[test]
    fn test_failed_summary_maps_to_io_error() {
        let summary = RelaySummary {
            stats: stats(),
            upstream: DirectionEnd::Aborted,
            downstream: DirectionEnd::WriteFailed(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")),
            termination: Termination::Failed,
        };
        match summary.check() {
            Err(CatError::Write { direction, bytes, .. }) => {
                assert_eq!(direction, Direction::Downstream);
                assert_eq!(bytes, 20);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_summary_is_interrupted() {
        let summary = RelaySummary {
            stats: stats(),
            upstream: DirectionEnd::Aborted,
            downstream: DirectionEnd::Aborted,
            termination: Termination::Cancelled,
        };
        assert!(matches!(summary.check(), Err(CatError::Interrupted)));
    }

    #[test]
    fn test_direction_end_classification() {
        assert!(DirectionEnd::Disabled.is_clean());
        assert!(!DirectionEnd::Aborted.is_clean());
        assert!(!DirectionEnd::Aborted.is_failure());
        assert!(DirectionEnd::ReadFailed(io::Error::new(io::ErrorKind::Other, "x")).is_failure());
    }
}
