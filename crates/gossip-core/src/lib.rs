//! gossip-core: Gossip-based group membership with heartbeat failure detection.
//!
//! This crate provides the core functionality for:
//! - Keeping a mergeable table of known peers and their heartbeats
//! - Encoding membership messages to a compact binary wire format
//! - Joining a group through a well-known rendezvous node
//! - Periodic gossip dissemination and timeout-based failure detection
//!
//! Everything here is transport- and clock-agnostic; a node is driven by
//! calling [`MembershipNode::node_loop`] (or `check_messages` and `tick`)
//! from a single thread of control.

pub mod clock;
pub mod config;
pub mod events;
pub mod gossip;
pub mod join;
pub mod membership;
pub mod node;
pub mod peer_id;
pub mod protocol;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, DEFAULT_TIMEOUT_TICKS, JoinRetryConfig, MembershipConfig};
pub use events::{EventBus, EventLog, MembershipEvent, Subscription};
pub use gossip::{GossipEngine, GossipRound};
pub use join::{JoinAction, JoinProtocol, JoinState};
pub use membership::{MembershipEntry, MembershipTable, MergeOutcome, Timestamp};
pub use node::{MembershipNode, NodeError};
pub use peer_id::{PeerId, PeerIdError, PeerIdRange};
pub use protocol::{CodecError, Heartbeat, Message, MessageKind};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportError};
