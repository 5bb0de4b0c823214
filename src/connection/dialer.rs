//! Listener and Dialer
//!
//! Produce exactly one `Connection` per invocation, either by binding and
//! accepting or by resolving and connecting. Failures are terminal; nothing
//! here retries.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::Connection;
use crate::error::{CatError, Result};

/// `host:port`, with IPv6 literals bracketed
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// A bound listening socket that will hand out a single connection
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `host:port`
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = join_host_port(host, port);
        debug!("Binding TCP listener to {}", addr);

        let inner = TcpListener::bind(&addr)
            .await
            .map_err(|source| CatError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = inner.local_addr().map_err(|source| CatError::Bind {
            addr: addr.clone(),
            source,
        })?;

        info!("Listening on {}", local_addr);
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one client and close the listening socket
    pub async fn accept_one(self) -> Result<Connection> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|source| CatError::Accept {
                addr: self.local_addr,
                source,
            })?;
        info!("Accepted connection from {}", peer);

        let connection = Connection::from_stream(stream).map_err(|source| CatError::Accept {
            addr: self.local_addr,
            source,
        })?;
        // `self.inner` is dropped here: no further clients are accepted
        Ok(connection)
    }
}

/// Bind `host:port` and accept exactly one incoming connection
pub async fn listen(host: &str, port: u16) -> Result<Connection> {
    Listener::bind(host, port).await?.accept_one().await
}

/// Resolve `host` and connect, giving up once `connect_timeout` has elapsed
pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Connection> {
    let target = join_host_port(host, port);
    let deadline = Instant::now() + connect_timeout;
    debug!("Connecting to {} (timeout {:?})", target, connect_timeout);

    let addrs = resolve(host, &target, connect_timeout).await?;

    // Each resolved address is attempted once
    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                info!("Connected to {}", addr);
                return Connection::from_stream(stream).map_err(|source| CatError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", addr, e);
                last_error = Some(e);
            }
            Err(_) => {
                warn!("Connection to {} timed out", addr);
                break;
            }
        }
    }

    match last_error {
        Some(source) if Instant::now() < deadline => Err(CatError::Connect {
            addr: target,
            source,
        }),
        _ => Err(CatError::Timeout {
            addr: target,
            timeout: connect_timeout,
        }),
    }
}

async fn resolve(host: &str, target: &str, limit: Duration) -> Result<Vec<SocketAddr>> {
    match timeout(limit, lookup_host(target)).await {
        Ok(Ok(addrs)) => {
            let resolved: Vec<SocketAddr> = addrs.collect();
            if resolved.is_empty() {
                return Err(CatError::Resolution {
                    host: host.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
                });
            }
            debug!("Resolved {} to {} addresses", host, resolved.len());
            Ok(resolved)
        }
        Ok(Err(source)) => Err(CatError::Resolution {
            host: host.to_string(),
            source,
        }),
        Err(_) => Err(CatError::Timeout {
            addr: target.to_string(),
            timeout: limit,
        }),
    }
}
