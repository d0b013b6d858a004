//! Blocking TCP transport speaking length-framed packets.
//!
//! Sockets are created with `socket2` so listener options and connect
//! timeouts can be set before the kernel sees the socket, then handed to
//! `std::net` for blocking I/O.

use crate::packet::Packet;
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::trace;

/// Read buffer growth step
const READ_CHUNK: usize = 4 * 1024;

/// Listen backlog; only one peer is ever accepted.
const BACKLOG: i32 = 16;

/// Open a blocking connection to `addr`, giving up after `timeout`.
pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<FramedStream> {
    let socket = new_socket(addr)?;
    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nodelay(true)?;
    Ok(FramedStream::new(socket.into()))
}

/// Bind and listen on `addr` in blocking mode.
pub fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = new_socket(addr)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(false)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}

fn new_socket(addr: SocketAddr) -> io::Result<socket2::Socket> {
    socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
}

/// A connected stream that sends and receives whole packets.
///
/// Bytes of a frame that has not fully arrived are kept between
/// `receive` calls, so a read timeout never loses data.
#[derive(Debug)]
pub struct FramedStream {
    stream: TcpStream,
    pending: BytesMut,
}

impl FramedStream {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Bound each blocking read; `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Write the packet as one frame, blocking until it is handed to the kernel.
    pub fn send(&mut self, packet: &Packet) -> io::Result<()> {
        let frame = packet
            .to_frame()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.stream.write_all(&frame)?;
        trace!(bytes = frame.len(), "Frame sent");
        Ok(())
    }

    /// Read until one whole frame is available and load it into `packet`.
    ///
    /// Returns the socket's `WouldBlock`/`TimedOut` error when the read
    /// timeout expires first, and `UnexpectedEof` once the peer has closed.
    pub fn receive(&mut self, packet: &mut Packet) -> io::Result<()> {
        loop {
            if packet
                .take_frame(&mut self.pending)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            {
                trace!(bytes = packet.len(), "Frame received");
                return Ok(());
            }

            let start = self.pending.len();
            self.pending.resize(start + READ_CHUNK, 0);
            let result = self.stream.read(&mut self.pending[start..]);
            let n = match result {
                Ok(n) => n,
                Err(e) => {
                    self.pending.truncate(start);
                    return Err(e);
                }
            };
            self.pending.truncate(start + n);

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                ));
            }
        }
    }
}

/// True for errors that only mean "nothing arrived before the read timeout".
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
