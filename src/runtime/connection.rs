//! Connection state shared by the sending and receiving roles.
//!
//! Each role owns one [`Connection`]: the endpoint it was built for, its
//! socket in whatever state the role has driven it to, and a single packet
//! buffer reused for every message.

use crate::packet::Packet;
use crate::runtime::transport::FramedStream;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::time::Duration;

/// Address + port pair both roles are configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    address: Ipv4Addr,
    port: u16,
}

impl Endpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Current state of a connection's socket.
#[derive(Debug, Default)]
pub enum Socket {
    /// Nothing opened yet.
    #[default]
    Unconnected,
    /// Waiting for the single inbound peer.
    Listening(TcpListener),
    /// Exchanging packets with a peer.
    Connected(FramedStream),
}

/// How the receive loop treats failed attempts.
///
/// Read timeouts are not failures and never count against `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts tolerated per packet; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Pause after each failed attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Retry immediately and forever.
    ///
    /// Selected by configuring no attempt limit and a zero backoff.
    pub const SPIN: RetryPolicy = RetryPolicy {
        max_attempts: None,
        backoff: Duration::ZERO,
    };

    /// Whether another attempt is allowed after `failures` failed ones.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Endpoint, socket and packet buffer owned by one role.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    pub socket: Socket,
    pub packet: Packet,
}

impl Connection {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            socket: Socket::Unconnected,
            packet: Packet::new(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        matches!(self.socket, Socket::Connected(_))
    }

    /// Send the packet buffer over the connected stream.
    pub fn send_packet(&mut self) -> std::io::Result<()> {
        match &mut self.socket {
            Socket::Connected(stream) => stream.send(&self.packet),
            _ => Err(not_connected()),
        }
    }

    /// Receive one frame into the packet buffer.
    pub fn receive_packet(&mut self) -> std::io::Result<()> {
        match &mut self.socket {
            Socket::Connected(stream) => stream.receive(&mut self.packet),
            _ => Err(not_connected()),
        }
    }
}

fn not_connected() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "socket is not connected")
}
