//! # Remote Console Client
//!
//! Client side of the control protocol spoken by running instances. The
//! manager uses it to dispatch administrative commands (`say`, `stop`,
//! `op <name>`, `save-all`, ...) and the `mcrcon` binary exposes the same
//! exchange on the command line.
//!
//! ## Exchange
//!
//! Each call opens a fresh TCP connection, authenticates with the shared
//! secret configured in the instance's `rcon.password`, issues exactly one
//! command and returns the reply body. Connections are never pooled: an
//! instance may restart between two commands and a stale socket would only
//! surface as a confusing error later.
//!
//! ## Framing
//!
//! Packet encoding lives in the `shared` crate so that test servers and the
//! client agree on the same codec.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rcon::RconError> {
//!     let addr = "127.0.0.1:15565".parse().unwrap();
//!     let reply = rcon::send(addr, "secret", "list", Duration::from_secs(5)).await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! ```

use log::debug;
use shared::{
    Packet, PacketHeader, ProtocolError, AUTH_FAILED_ID, HEADER_LEN, SERVERDATA_RESPONSE_VALUE,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("authentication rejected")]
    AuthRejected,
    #[error("unexpected reply id {got}, expected {expected}")]
    UnexpectedReply { expected: i32, got: i32 },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, RconError>;

/// A single authenticated session with a control endpoint.
pub struct RconClient<S> {
    stream: S,
    next_id: i32,
}

impl RconClient<TcpStream> {
    /// Opens a TCP connection, giving up after `limit`.
    pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<Self> {
        let stream = timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| RconError::Timeout(limit))??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> RconClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream, next_id: 1 }
    }

    fn next_request_id(&mut self) -> i32 {
        let id = self.next_id;
        // -1 is reserved for auth failures, so ids stay positive
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }

    /// Sends the shared secret and waits for the auth response.
    pub async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.next_request_id();
        self.write_packet(&Packet::auth(id, password)).await?;

        loop {
            let reply = self.read_packet().await?;

            // Some servers send an empty response value ahead of the auth response
            if reply.kind == SERVERDATA_RESPONSE_VALUE {
                continue;
            }

            if reply.request_id == AUTH_FAILED_ID {
                return Err(RconError::AuthRejected);
            }
            if reply.request_id != id {
                return Err(RconError::UnexpectedReply {
                    expected: id,
                    got: reply.request_id,
                });
            }
            return Ok(());
        }
    }

    /// Runs `command` and returns the reply body.
    pub async fn command(&mut self, command: &str) -> Result<String> {
        let id = self.next_request_id();
        let packet = Packet::command(id, command)?;

        debug!("rcon -> {}", command);
        self.write_packet(&packet).await?;

        let reply = self.read_packet().await?;
        if reply.request_id != id {
            return Err(RconError::UnexpectedReply {
                expected: id,
                got: reply.request_id,
            });
        }

        debug!("rcon <- {}", reply.body);
        Ok(reply.body)
    }

    async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let header = PacketHeader::decode(&header)?;

        let mut payload = vec![0u8; header.payload_len()];
        self.stream.read_exact(&mut payload).await?;

        Ok(Packet::decode(header, &payload)?)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Connects, authenticates and runs one command. The whole exchange is
/// bounded by `limit`.
pub async fn send(
    addr: SocketAddr,
    password: &str,
    command: &str,
    limit: Duration,
) -> Result<String> {
    let exchange = async {
        let mut client = RconClient::connect(addr, limit).await?;
        client.authenticate(password).await?;
        client.command(command).await
    };

    timeout(limit, exchange)
        .await
        .map_err(|_| RconError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::SERVERDATA_AUTH_RESPONSE;
    use tokio_test::io::Builder;

    fn encoded(packet: Packet) -> Vec<u8> {
        packet.encode().unwrap()
    }

    fn auth_response(id: i32) -> Vec<u8> {
        encoded(Packet {
            request_id: id,
            kind: SERVERDATA_AUTH_RESPONSE,
            body: String::new(),
        })
    }

    #[tokio::test]
    async fn test_authenticate_and_command() {
        let mock = Builder::new()
            .write(&encoded(Packet::auth(1, "hunter2")))
            .read(&auth_response(1))
            .write(&encoded(Packet::command(2, "time set day").unwrap()))
            .read(&encoded(Packet::response(2, "Set the time to 1000")))
            .build();

        let mut client = RconClient::new(mock);
        client.authenticate("hunter2").await.unwrap();
        let reply = client.command("time set day").await.unwrap();

        assert_eq!(reply, "Set the time to 1000");
    }

    #[tokio::test]
    async fn test_empty_response_before_auth_is_skipped() {
        let mock = Builder::new()
            .write(&encoded(Packet::auth(1, "pw")))
            .read(&encoded(Packet::response(1, "")))
            .read(&auth_response(1))
            .build();

        let mut client = RconClient::new(mock);
        assert!(client.authenticate("pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let mock = Builder::new()
            .write(&encoded(Packet::auth(1, "wrong")))
            .read(&auth_response(AUTH_FAILED_ID))
            .build();

        let mut client = RconClient::new(mock);
        let result = client.authenticate("wrong").await;

        assert!(matches!(result, Err(RconError::AuthRejected)));
    }

    #[tokio::test]
    async fn test_mismatched_reply_id() {
        let mock = Builder::new()
            .write(&encoded(Packet::command(1, "list").unwrap()))
            .read(&encoded(Packet::response(9, "stray")))
            .build();

        let mut client = RconClient::new(mock);
        let result = client.command("list").await;

        assert!(matches!(
            result,
            Err(RconError::UnexpectedReply {
                expected: 1,
                got: 9
            })
        ));
    }

    #[tokio::test]
    async fn test_oversized_command_is_not_sent() {
        let mock = Builder::new().build();
        let mut client = RconClient::new(mock);

        let result = client.command(&"a".repeat(2000)).await;
        assert!(matches!(
            result,
            Err(RconError::Protocol(ProtocolError::CommandTooLong(2000)))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

        let result = send(addr, "pw", "list", Duration::from_millis(500)).await;
        assert!(matches!(
            result,
            Err(RconError::Io(_)) | Err(RconError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_request_ids_stay_positive() {
        let mut client = RconClient::new(Builder::new().build());
        client.next_id = i32::MAX;

        assert_eq!(client.next_request_id(), i32::MAX);
        assert_eq!(client.next_request_id(), 1);
    }
}
