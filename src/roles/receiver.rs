//! Receiving role: listen, accept a single peer, print every packet.

use crate::console::Console;
use crate::runtime::transport::{self, FramedStream};
use crate::runtime::{Connection, Endpoint, Job, RetryPolicy, RunFlag, Socket};
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// One-shot notification carrying the address the listener is bound to.
pub type ReadySignal = mpsc::Sender<SocketAddr>;

/// Accepts one connection and prints the string carried by each packet.
///
/// The socket read timeout bounds every blocking receive so the running
/// flag is re-checked while the peer is idle.
#[derive(Debug)]
pub struct TcpReceiver {
    conn: Connection,
    console: Arc<Console>,
    read_timeout: Duration,
    retry: RetryPolicy,
    ready: Option<ReadySignal>,
    received: u64,
}

impl TcpReceiver {
    pub fn new(
        endpoint: Endpoint,
        console: Arc<Console>,
        read_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            conn: Connection::new(endpoint),
            console,
            read_timeout,
            retry,
            ready: None,
            received: 0,
        }
    }

    /// Notify `ready` with the bound address once the socket is listening.
    ///
    /// The sender is dropped without a message if listening fails.
    pub fn with_ready_signal(mut self, ready: ReadySignal) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Payloads printed so far.
    #[cfg(test)]
    pub fn received(&self) -> u64 {
        self.received
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Replace the listening socket with the first accepted peer.
    fn accept(&mut self) -> io::Result<SocketAddr> {
        let Socket::Listening(listener) = &self.conn.socket else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is not listening",
            ));
        };

        let (stream, peer) = listener.accept()?;
        let stream = FramedStream::new(stream);
        let timeout = (!self.read_timeout.is_zero()).then_some(self.read_timeout);
        stream.set_read_timeout(timeout)?;

        self.conn.socket = Socket::Connected(stream);
        Ok(peer)
    }

    fn fail(&self, flag: &RunFlag, message: std::fmt::Arguments<'_>) {
        self.console.println(message);
        flag.stop();
    }
}

impl Job for TcpReceiver {
    fn init(&mut self, flag: &RunFlag) {
        let endpoint = self.conn.endpoint();
        let ready = self.ready.take();

        self.console
            .println(format_args!("Listening on port ({})", endpoint.port()));

        let listener = match transport::listen(endpoint.socket_addr()) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(addr = %endpoint, error = %e, "Listen failed");
                self.fail(
                    flag,
                    format_args!("Failed to listen on port ({}): {e}", endpoint.port()),
                );
                return;
            }
        };

        if let Some(ready) = ready {
            match listener.local_addr() {
                Ok(local) => {
                    let _ = ready.send(local);
                }
                Err(e) => debug!(error = %e, "Could not read listener address"),
            }
        }
        self.conn.socket = Socket::Listening(listener);

        match self.accept() {
            Ok(peer) => {
                info!(peer = %peer, "Accepted connection");
                self.console
                    .println(format_args!("Connection from address ({peer})"));
            }
            Err(e) => {
                warn!(addr = %endpoint, error = %e, "Accept failed");
                self.fail(flag, format_args!("Connection timed out or failed: {e}"));
            }
        }
    }

    fn frame(&mut self, flag: &RunFlag) {
        self.conn.packet.clear();

        let mut failures = 0;
        loop {
            if !flag.is_running() {
                return;
            }

            match self.conn.receive_packet() {
                Ok(()) => break,
                Err(e) if transport::is_timeout(&e) => {
                    trace!("Receive timed out, retrying");
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(received = self.received, "Peer disconnected");
                    self.fail(flag, format_args!("Peer disconnected"));
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(error = %e, "Invalid frame");
                    self.fail(flag, format_args!("Invalid data received: {e}"));
                    return;
                }
                Err(e) => {
                    failures += 1;
                    debug!(attempt = failures, error = %e, "Receive failed");
                    if !self.retry.allows(failures) {
                        warn!(attempts = failures, error = %e, "Giving up on receive");
                        self.fail(
                            flag,
                            format_args!("Failed to receive data after {failures} attempts: {e}"),
                        );
                        return;
                    }
                    if !self.retry.backoff.is_zero() {
                        thread::sleep(self.retry.backoff);
                    }
                }
            }
        }

        match self.conn.packet.extract::<String>() {
            Ok(payload) => {
                if !self.conn.packet.end_of_packet() {
                    debug!("Ignoring trailing bytes after payload");
                }
                self.received += 1;
                let console = self.console.lock();
                console.println("Data received:");
                console.print(format_args!("\t'{payload}'\n"));
            }
            Err(e) => {
                warn!(error = %e, "Malformed packet");
                self.console
                    .println(format_args!("Malformed packet: {e}"));
            }
        }
    }
}
