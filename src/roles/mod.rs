//! The two ends of the exchange.
//!
//! Both roles are [`Job`](crate::runtime::Job)s over a
//! [`Connection`](crate::runtime::Connection) and agree on the endpoint
//! out of band:
//!
//! - `sender`: connects out, then reads one console token per frame and
//!   sends it as one packet.
//! - `receiver`: listens, accepts a single peer, then prints the string in
//!   each packet it receives.
//!
//! ```text
//! stdin ─▶ TcpSender ── <len><len>"token" ──▶ TcpReceiver ─▶ console
//! ```

pub mod receiver;
pub mod sender;

pub use receiver::TcpReceiver;
pub use sender::TcpSender;
