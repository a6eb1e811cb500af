//! Wire types shared by the fleet manager and the control client.
//!
//! Every managed instance exposes a control endpoint speaking the remote
//! console protocol: little-endian framed packets of
//! `length | request id | kind | body | NUL | NUL`, where `length` counts
//! everything after itself. The fixed header is encoded with bincode's
//! legacy configuration (little-endian, fixed-width integers), the body is
//! raw bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance between an instance's game port and its control port.
pub const CONTROL_PORT_OFFSET: u16 = 10_000;
/// Port allocation starts one above this value.
pub const DEFAULT_BASE_PORT: u16 = 25_564;

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Request id the server answers with when authentication fails.
pub const AUTH_FAILED_ID: i32 = -1;

/// Size of the fixed `length | request id | kind` header.
pub const HEADER_LEN: usize = 12;
/// Smallest legal `length` value: id + kind + two terminators.
pub const MIN_PACKET_LEN: i32 = 10;
/// Largest `length` value we accept (4096-byte response body).
pub const MAX_PACKET_LEN: i32 = 4096 + MIN_PACKET_LEN;
/// Servers reject client bodies longer than this.
pub const MAX_COMMAND_LEN: usize = 1446;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("invalid packet length {0}")]
    InvalidLength(i32),
    #[error("packet body contains a NUL byte")]
    EmbeddedNul,
    #[error("command of {0} bytes exceeds the 1446 byte limit")]
    CommandTooLong(usize),
    #[error("header codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Returns the control port paired with `server_port`, if there is one.
pub fn control_port(server_port: u16) -> Option<u16> {
    server_port
        .checked_sub(CONTROL_PORT_OFFSET)
        .filter(|port| *port != 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub length: i32,
    pub request_id: i32,
    pub kind: i32,
}

impl PacketHeader {
    /// Decodes and validates the first [`HEADER_LEN`] bytes of a packet.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                got: bytes.len(),
            });
        }

        let header: PacketHeader = bincode::deserialize(&bytes[..HEADER_LEN])?;
        if !(MIN_PACKET_LEN..=MAX_PACKET_LEN).contains(&header.length) {
            return Err(ProtocolError::InvalidLength(header.length));
        }
        Ok(header)
    }

    /// Bytes that follow the header, terminators included.
    pub fn payload_len(&self) -> usize {
        (self.length - 8) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl Packet {
    pub fn auth(request_id: i32, password: &str) -> Self {
        Self {
            request_id,
            kind: SERVERDATA_AUTH,
            body: password.to_string(),
        }
    }

    pub fn command(request_id: i32, command: &str) -> Result<Self, ProtocolError> {
        if command.len() > MAX_COMMAND_LEN {
            return Err(ProtocolError::CommandTooLong(command.len()));
        }
        Ok(Self {
            request_id,
            kind: SERVERDATA_EXECCOMMAND,
            body: command.to_string(),
        })
    }

    pub fn response(request_id: i32, body: &str) -> Self {
        Self {
            request_id,
            kind: SERVERDATA_RESPONSE_VALUE,
            body: body.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.body.as_bytes().contains(&0) {
            return Err(ProtocolError::EmbeddedNul);
        }

        let length = self.body.len() as i64 + MIN_PACKET_LEN as i64;
        if length > MAX_PACKET_LEN as i64 {
            return Err(ProtocolError::InvalidLength(length.min(i32::MAX as i64) as i32));
        }

        let header = PacketHeader {
            length: length as i32,
            request_id: self.request_id,
            kind: self.kind,
        };

        let mut bytes = bincode::serialize(&header)?;
        bytes.extend_from_slice(self.body.as_bytes());
        bytes.extend_from_slice(&[0, 0]);
        Ok(bytes)
    }

    /// Builds a packet from a decoded header and the payload that followed it.
    pub fn decode(header: PacketHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        let needed = header.payload_len();
        if payload.len() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                got: payload.len(),
            });
        }

        let mut body = &payload[..needed];
        while let [rest @ .., 0] = body {
            body = rest;
        }

        Ok(Self {
            request_id: header.request_id,
            kind: header.kind,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = PacketHeader::decode(bytes)?;
        Self::decode(header, &bytes[HEADER_LEN..])
    }
}
