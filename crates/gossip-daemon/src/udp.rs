//! UDP transport for membership messages.
//!
//! One datagram carries one encoded message. Sends and receives never
//! block: the daemon's event loop waits for readability and then drains
//! the socket through [`Transport::try_recv`].

use gossip_core::transport::{self, TransportError};
use gossip_core::{PeerId, Transport};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Error)]
pub enum UdpError {
    #[error("only IPv4 addresses can be group members, got {0}")]
    NotIpv4(SocketAddr),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// A bound UDP socket acting as one group member's endpoint.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: PeerId,
    buf: Mutex<Vec<u8>>,
}

impl UdpTransport {
    /// Bind to `addr`. Port 0 picks a free port; the resolved address
    /// becomes this node's PeerId.
    pub async fn bind(addr: SocketAddr) -> Result<Self, UdpError> {
        if !addr.is_ipv4() {
            return Err(UdpError::NotIpv4(addr));
        }
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    /// Wrap an already bound socket.
    pub fn from_socket(socket: UdpSocket) -> Result<Self, UdpError> {
        let local = match socket.local_addr()? {
            SocketAddr::V4(v4) => PeerId::from(v4),
            other => return Err(UdpError::NotIpv4(other)),
        };
        Ok(Self {
            socket: Arc::new(socket),
            local,
            buf: Mutex::new(vec![0; MAX_DATAGRAM_SIZE]),
        })
    }

    /// Shared handle for readiness polling.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

impl Transport for UdpTransport {
    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    fn send(&self, to: PeerId, data: &[u8]) -> transport::Result<()> {
        let target = SocketAddrV4::from(to);
        match self.socket.try_send_to(data, SocketAddr::V4(target)) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(TransportError::SendFailed(
                format!("send buffer full for {to}"),
            )),
            Err(e) => Err(TransportError::SendFailed(format!("{to}: {e}"))),
        }
    }

    fn try_recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        match self.socket.try_recv_from(&mut buf) {
            Ok((len, from)) => {
                debug!("{}: {} bytes from {}", self.local, len, from);
                Ok(Some(buf[..len].to_vec()))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}
