//! Membership view for the gossip protocol.
//!
//! Each node keeps a table of every peer it has heard of, the highest
//! heartbeat (incarnation) seen for it, and when that heartbeat last moved.
//! Tables converge through pairwise merges; a peer whose heartbeat stops
//! moving is evicted locally once it ages past the failure timeout.

pub mod table;

pub use table::{MembershipEntry, MembershipTable, MergeOutcome, Timestamp};
