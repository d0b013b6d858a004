//! Sending role: connect out, then send one console token per packet.

use crate::console::{Console, Tokens};
use crate::runtime::transport;
use crate::runtime::{Connection, Endpoint, Job, RunFlag, Socket};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reads tokens from its input and sends each one as a single-string packet.
///
/// A failed connect stops the worker during `init`, so no frame ever runs.
/// End of input or a failed send stops it after the current frame.
#[derive(Debug)]
pub struct TcpSender {
    conn: Connection,
    console: Arc<Console>,
    input: Tokens,
    connect_timeout: Duration,
    frames: u64,
    sent: u64,
}

impl TcpSender {
    pub fn new(
        endpoint: Endpoint,
        console: Arc<Console>,
        input: Tokens,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            conn: Connection::new(endpoint),
            console,
            input,
            connect_timeout,
            frames: 0,
            sent: 0,
        }
    }

    /// Number of times `frame` has run.
    #[cfg(test)]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Packets handed to the socket.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }
}

impl Job for TcpSender {
    fn init(&mut self, flag: &RunFlag) {
        let endpoint = self.conn.endpoint();
        self.console
            .println(format_args!("Connecting socket ({endpoint})"));

        match transport::connect(endpoint.socket_addr(), self.connect_timeout) {
            Ok(stream) => {
                info!(addr = %endpoint, "Connected");
                self.conn.socket = Socket::Connected(stream);
                self.console
                    .println(format_args!("Socket connected ({endpoint})"));
            }
            Err(e) => {
                warn!(addr = %endpoint, error = %e, "Connect failed");
                self.console
                    .println(format_args!("Connection timed out or failed ({endpoint}): {e}"));
                flag.stop();
            }
        }
    }

    fn frame(&mut self, flag: &RunFlag) {
        self.frames += 1;
        self.console.println("Enter data");

        let token = match self.input.next_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("Input closed");
                self.console.println("End of input");
                flag.stop();
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read input");
                self.console
                    .println(format_args!("Failed to read input: {e}"));
                flag.stop();
                return;
            }
        };

        debug_assert!(self.conn.packet.is_empty(), "packet buffer not cleared");
        self.conn.packet.append(token.as_str());

        let result = {
            let console = self.console.lock();
            let result = self.conn.send_packet();
            match &result {
                Ok(()) => console.println("Data sent"),
                Err(e) => console.println(format_args!("Failed to send data: {e}")),
            }
            result
        };

        self.conn.packet.clear();

        match result {
            Ok(()) => {
                self.sent += 1;
                debug!(bytes = token.len(), "Token sent");
            }
            Err(e) => {
                warn!(error = %e, "Send failed");
                flag.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Capture;
    use crate::packet::Packet;
    use crate::runtime::transport::FramedStream;
    use crate::runtime::Worker;
    use std::io::Cursor;
    use std::net::Ipv4Addr;
    use std::thread;

    fn sender(endpoint: Endpoint, capture: &Capture, input: &'static str) -> TcpSender {
        TcpSender::new(
            endpoint,
            Arc::new(Console::new(capture.clone())),
            Tokens::new(Cursor::new(input)),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_connect_failure_never_runs_frame() {
        let capture = Capture::default();
        let endpoint = Endpoint::new(Ipv4Addr::LOCALHOST, 4901);
        let mut worker = Worker::new("sender", sender(endpoint, &capture, "unused\n"));

        worker.run_inline().unwrap();

        assert!(!worker.is_running());
        let job = worker.job().unwrap();
        assert_eq!(job.frames(), 0);
        assert!(!job.is_connected());

        let output = capture.contents();
        assert!(output.contains("Connecting socket (127.0.0.1:4901)"));
        assert!(output.contains("Connection timed out or failed (127.0.0.1:4901)"));
        assert!(!output.contains("Enter data"));
    }

    #[test]
    fn test_sends_each_token_as_one_packet() {
        let listener = transport::listen((Ipv4Addr::LOCALHOST, 0).into()).unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut stream = FramedStream::new(stream);
            let mut packet = Packet::new();
            let mut words = Vec::new();
            while stream.receive(&mut packet).is_ok() {
                words.push(packet.extract::<String>().unwrap());
                assert!(packet.end_of_packet());
            }
            words
        });

        let capture = Capture::default();
        let endpoint = Endpoint::new(Ipv4Addr::LOCALHOST, port);
        let mut worker = Worker::new("sender", sender(endpoint, &capture, "red green\nblue\n"));
        worker.run_inline().unwrap();

        let job = worker.job().unwrap();
        assert!(job.is_connected());
        assert_eq!(job.sent(), 3);
        // Three sends plus the frame that hit end of input.
        assert_eq!(job.frames(), 4);

        drop(worker);
        assert_eq!(peer.join().unwrap(), ["red", "green", "blue"]);

        let output = capture.contents();
        assert_eq!(output.matches("Data sent").count(), 3);
        assert!(output.contains("End of input"));
    }
}
