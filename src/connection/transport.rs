//! TCP Transport

use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// An established TCP connection, dialed or accepted
pub struct Connection {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Wrap an established stream
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        // Interactive traffic: don't hold back small writes
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", peer_addr, e);
        }
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
        })
    }

    /// Our end of the connection
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The remote end of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split into independently owned read and write halves.
    /// Dropping the write half sends FIN (half-close).
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local_addr, self.peer_addr)
    }
}
