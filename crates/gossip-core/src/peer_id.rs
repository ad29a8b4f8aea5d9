//! PeerId: Address-derived identifier for a group member.
//!
//! A peer is identified by the (host, port) pair it listens on. The host is a
//! 4-byte identifier (an IPv4 address for the UDP daemon, a small integer in
//! simulations) and displays as a dotted quad: `10.0.0.7:7000`.

use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ops::RangeInclusive;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerIdError {
    #[error("Invalid peer ID format: expected host:port, got {0:?}")]
    InvalidFormat(String),
    #[error("Invalid host: {0}")]
    InvalidHost(#[from] std::net::AddrParseError),
    #[error("Invalid port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// A unique identifier for a peer in the group.
///
/// # Examples
/// ```
/// use gossip_core::PeerId;
///
/// let peer_id = PeerId::new(1, 7000);
/// assert_eq!(peer_id.to_string(), "0.0.0.1:7000");
///
/// let parsed: PeerId = "0.0.0.1:7000".parse().unwrap();
/// assert_eq!(parsed, peer_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    host: u32,
    port: u16,
}

impl PeerId {
    /// The reserved "no address" identifier.
    pub const NULL: PeerId = PeerId { host: 0, port: 0 };

    pub const fn new(host: u32, port: u16) -> Self {
        Self { host, port }
    }

    /// The 4-byte host identifier.
    pub fn host(&self) -> u32 {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.host), self.port)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| PeerIdError::InvalidFormat(s.to_string()))?;
        let host: Ipv4Addr = host.parse()?;
        let port: u16 = port.parse()?;
        Ok(Self::new(host.into(), port))
    }
}

impl From<SocketAddrV4> for PeerId {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new((*addr.ip()).into(), addr.port())
    }
}

impl From<PeerId> for SocketAddrV4 {
    fn from(peer_id: PeerId) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(peer_id.host), peer_id.port)
    }
}

// Serialize as "host:port" for consistency in logs, events, JSON
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Bound on the host identifiers a table will accept.
///
/// Guards against malformed identifiers arriving in gossip. The null
/// identifier is always rejected regardless of the bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdRange {
    hosts: RangeInclusive<u32>,
}

impl PeerIdRange {
    /// Accept every non-null identifier.
    pub fn any() -> Self {
        Self {
            hosts: 0..=u32::MAX,
        }
    }

    /// Accept only hosts within `hosts` (e.g. `1..=10` for a simulated group).
    pub fn hosts(hosts: RangeInclusive<u32>) -> Self {
        Self { hosts }
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        !peer_id.is_null() && self.hosts.contains(&peer_id.host)
    }
}

impl Default for PeerIdRange {
    fn default() -> Self {
        Self::any()
    }
}
