//! packet-relay: a point-to-point TCP exchange
//!
//! Two workers share one process:
//! - a receiver that listens, accepts a single peer and prints every packet
//! - a sender that connects to it and sends each console token as a packet
//!
//! Features:
//! - Worker runtime with one-time init and a stoppable frame loop
//! - Length-framed packets carrying one string each
//! - Synchronized console output across threads
//! - Configuration via CLI arguments or TOML file

mod config;
mod console;
mod packet;
mod roles;
mod runtime;

use config::Config;
use console::{Console, Tokens};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging on stderr so it stays out of the console output
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        endpoint = %config.endpoint,
        wait_for_listener = config.wait_for_listener,
        read_timeout_ms = config.read_timeout.as_millis() as u64,
        max_attempts = ?config.retry.max_attempts,
        "Starting packet-relay"
    );

    let console = Arc::new(Console::stdout());
    runtime::run(config, console, Tokens::stdin())?;
    Ok(())
}
