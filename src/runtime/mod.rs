//! Thread-per-worker runtime.
//!
//! Shared abstractions:
//! - `Worker`/`Job`: one-time init followed by a repeated frame, on a
//!   spawned thread or the caller's
//! - `Connection`: endpoint, socket state and reusable packet buffer
//! - `transport`: blocking connect/listen and framed send/receive

mod connection;
pub mod transport;
mod worker;

pub use connection::{Connection, Endpoint, RetryPolicy, Socket};
pub use worker::{Job, RunFlag, Worker, WorkerError};

use crate::config::Config;
use crate::console::{Console, Tokens};
use crate::roles::{TcpReceiver, TcpSender};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{info, warn};

/// Run both roles against the configured endpoint.
///
/// The receiver runs on a background thread; the sender runs on the
/// calling thread and this returns when its loop ends. The receiver is
/// then detached rather than joined, since it may still be blocked in
/// `accept`.
pub fn run(config: Config, console: Arc<Console>, input: Tokens) -> Result<(), WorkerError> {
    let (ready_tx, ready_rx) = mpsc::channel();

    let mut receiver = TcpReceiver::new(
        config.endpoint,
        Arc::clone(&console),
        config.read_timeout,
        config.retry,
    );
    if config.wait_for_listener {
        receiver = receiver.with_ready_signal(ready_tx);
    } else {
        drop(ready_tx);
    }
    let sender = TcpSender::new(
        config.endpoint,
        Arc::clone(&console),
        input,
        config.connect_timeout,
    );

    let mut receiver = Worker::new("receiver", receiver);
    let mut sender = Worker::new("sender", sender);

    receiver.start()?;

    if config.wait_for_listener {
        match ready_rx.recv_timeout(config.ready_timeout) {
            Ok(addr) => info!(addr = %addr, "Listener ready"),
            Err(e) => warn!(error = %e, "Listener did not report ready, connecting anyway"),
        }
    }

    sender.run_inline()?;
    info!(
        sent = sender.job().map_or(0, TcpSender::sent),
        "Sender stopped"
    );

    info!(running = receiver.is_running(), "Detaching receiver");
    receiver.detach();
    Ok(())
}
