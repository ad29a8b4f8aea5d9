//! gossip-daemon library: Exposes the daemon components for testing.
//!
//! A thin layer that runs a `gossip-core` node as an OS process: a UDP
//! transport plus the tokio event loop driving it.

pub mod runner;
pub mod udp;

pub use runner::{Daemon, DaemonError};
pub use udp::{MAX_DATAGRAM_SIZE, UdpError, UdpTransport};
