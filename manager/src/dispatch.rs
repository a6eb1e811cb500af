//! Remote command dispatch to a running instance and the liveness probe.

use crate::error::Result;
use async_trait::async_trait;
use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Talks to an instance's control endpoint.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends one administrative command and returns the reply text.
    async fn send(&self, endpoint: SocketAddr, secret: &str, command: &str) -> Result<String>;

    /// Whether the endpoint currently accepts connections. Never cached.
    async fn probe(&self, endpoint: SocketAddr) -> bool;
}

/// [`CommandTransport`] speaking RCON over TCP.
#[derive(Debug, Clone)]
pub struct RconTransport {
    command_timeout: Duration,
    probe_timeout: Duration,
}

impl RconTransport {
    pub fn new(command_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            command_timeout,
            probe_timeout,
        }
    }
}

#[async_trait]
impl CommandTransport for RconTransport {
    async fn send(&self, endpoint: SocketAddr, secret: &str, command: &str) -> Result<String> {
        debug!("Dispatching '{}' to {}", command, endpoint);
        let reply = rcon::send(endpoint, secret, command, self.command_timeout).await?;
        Ok(reply)
    }

    async fn probe(&self, endpoint: SocketAddr) -> bool {
        probe(endpoint, self.probe_timeout).await
    }
}

/// True when something accepts a TCP connection at `addr` within `limit`.
pub async fn probe(addr: SocketAddr, limit: Duration) -> bool {
    let up = matches!(timeout(limit, TcpStream::connect(addr)).await, Ok(Ok(_)));
    debug!("Probe {} -> {}", addr, if up { "up" } else { "down" });
    up
}
