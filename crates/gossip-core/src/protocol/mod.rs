//! Wire protocol for the membership group.
//!
//! Three message shapes travel between nodes:
//! - `JoinRequest`: a new node introduces itself to the rendezvous
//! - `JoinReply`: the rendezvous answers with its whole table
//! - `Gossip`: a periodic full-table push to a random peer

pub mod codec;
pub mod messages;

pub use codec::{
    decode, encode, CodecError, JOIN_REQUEST_LEN, SNAPSHOT_ENTRY_LEN, SNAPSHOT_HEADER_LEN,
};
pub use messages::{Heartbeat, Message, MessageKind};
