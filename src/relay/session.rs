//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use super::Direction;

/// Live byte counters for one connection's relay
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub start_time: Instant,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Statistics for a finished relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub session_id: String,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub duration: Duration,
    /// Local input -> connection
    pub bytes_sent: u64,
    /// Connection -> local output
    pub bytes_received: u64,
}

impl ConnectionStats {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }
}

impl RelaySession {
    /// Create a new relay session
    pub fn new(local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let session_id = format!("relay_{}_{}", timestamp, peer_addr.port());
        debug!("Creating relay session {} ({} <-> {})", session_id, local_addr, peer_addr);

        Self {
            session_id,
            local_addr,
            peer_addr,
            start_time: Instant::now(),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Bytes copied from local input to the connection so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Bytes copied from the connection to local output so far
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Bytes moved so far in `direction`
    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Upstream => self.bytes_sent(),
            Direction::Downstream => self.bytes_received(),
        }
    }

    /// Count `bytes` moved in `direction`
    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Upstream => self.bytes_sent.fetch_add(bytes, Ordering::Relaxed),
            Direction::Downstream => self.bytes_received.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    /// Time since the session started
    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Snapshot the counters
    pub fn to_stats(&self) -> ConnectionStats {
        ConnectionStats {
            session_id: self.session_id.clone(),
            local_addr: self.local_addr,
            peer_addr: self.peer_addr,
            duration: self.duration(),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
        }
    }

    /// Log session statistics
    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            local_addr = %self.local_addr,
            peer_addr = %self.peer_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_sent = self.bytes_sent(),
            bytes_received = self.bytes_received(),
            "Relay session completed"
        );
    }
}
