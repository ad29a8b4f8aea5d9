//! Membership protocol message types.

use crate::PeerId;
use crate::membership::{MembershipEntry, Timestamp};

/// A peer together with its heartbeat counter, as carried on the wire.
///
/// Timestamps are local to each node and never travel; the receiver stamps
/// what it merges with its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub peer_id: PeerId,
    pub incarnation: u64,
}

impl Heartbeat {
    pub fn new(peer_id: PeerId, incarnation: u64) -> Self {
        Self {
            peer_id,
            incarnation,
        }
    }

    /// Turn into a table entry stamped at `now`.
    pub fn at(self, now: Timestamp) -> MembershipEntry {
        MembershipEntry::new(self.peer_id, self.incarnation, now)
    }
}

impl From<&MembershipEntry> for Heartbeat {
    fn from(entry: &MembershipEntry) -> Self {
        Self::new(entry.peer_id, entry.incarnation)
    }
}

impl From<MembershipEntry> for Heartbeat {
    fn from(entry: MembershipEntry) -> Self {
        Self::from(&entry)
    }
}

/// Wire tag for each message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    JoinRequest = 0,
    JoinReply = 1,
    Gossip = 2,
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::JoinRequest),
            1 => Ok(Self::JoinReply),
            2 => Ok(Self::Gossip),
            other => Err(other),
        }
    }
}

/// Membership protocol messages.
///
/// Every message embeds the sender's own heartbeat so the receiver can merge
/// the sender like any other entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Sent by a joining node to the rendezvous.
    JoinRequest { sender: Heartbeat },

    /// Answer to a join request, carrying the replier's full table.
    JoinReply {
        sender: Heartbeat,
        snapshot: Vec<Heartbeat>,
    },

    /// Periodic push of the sender's full table.
    Gossip {
        sender: Heartbeat,
        snapshot: Vec<Heartbeat>,
    },
}

impl Message {
    pub fn join_request(peer_id: PeerId, incarnation: u64) -> Self {
        Self::JoinRequest {
            sender: Heartbeat::new(peer_id, incarnation),
        }
    }

    pub fn join_reply(sender: Heartbeat, snapshot: &[MembershipEntry]) -> Self {
        Self::JoinReply {
            sender,
            snapshot: snapshot.iter().map(Heartbeat::from).collect(),
        }
    }

    pub fn gossip(sender: Heartbeat, snapshot: &[MembershipEntry]) -> Self {
        Self::Gossip {
            sender,
            snapshot: snapshot.iter().map(Heartbeat::from).collect(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinRequest { .. } => MessageKind::JoinRequest,
            Self::JoinReply { .. } => MessageKind::JoinReply,
            Self::Gossip { .. } => MessageKind::Gossip,
        }
    }

    pub fn sender(&self) -> Heartbeat {
        match self {
            Self::JoinRequest { sender }
            | Self::JoinReply { sender, .. }
            | Self::Gossip { sender, .. } => *sender,
        }
    }

    /// The carried membership snapshot (empty for join requests).
    pub fn snapshot(&self) -> &[Heartbeat] {
        match self {
            Self::JoinRequest { .. } => &[],
            Self::JoinReply { snapshot, .. } | Self::Gossip { snapshot, .. } => snapshot,
        }
    }
}
