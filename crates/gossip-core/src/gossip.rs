//! Gossip engine: periodic anti-entropy and failure detection.
//!
//! Each round, for an in-group node:
//! 1. Sweep entries whose heartbeat has been still for longer than the
//!    failure timeout; each removal is a locally detected failure
//! 2. Randomly decide whether to stay silent this round
//! 3. Otherwise push the full table to `fanout` random peers
//!
//! Incoming gossip is merged entry by entry, so liveness information spreads
//! transitively without any node knowing the whole group.
//!
//! The engine performs no I/O. It returns a [`GossipRound`] and the caller
//! sends the message and publishes the events.

use crate::PeerId;
use crate::config::MembershipConfig;
use crate::membership::{MembershipEntry, MembershipTable, Timestamp};
use crate::protocol::{Heartbeat, Message};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outcome of one gossip tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipRound {
    /// Entries evicted by the sweep
    pub removed: Vec<MembershipEntry>,
    /// True when the round drew "silent"
    pub skipped: bool,
    /// Peers to send `message` to
    pub targets: Vec<PeerId>,
    /// Gossip message for `targets` (None when nothing is sent)
    pub message: Option<Message>,
}

/// Periodic dissemination and sweep.
pub struct GossipEngine {
    failure_timeout_ms: u64,
    skip_probability: f64,
    fanout: usize,
    rng: StdRng,
}

impl GossipEngine {
    /// Create an engine for the node at `local`.
    ///
    /// A configured seed is mixed with `local` so nodes sharing one config
    /// don't draw in lockstep.
    pub fn new(config: &MembershipConfig, local: PeerId) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ peer_salt(local)),
            None => StdRng::from_os_rng(),
        };
        Self {
            failure_timeout_ms: config.failure_timeout_ms(),
            skip_probability: config.skip_probability,
            fanout: config.fanout,
            rng,
        }
    }

    /// Run one round. `local` is the node's already-incremented heartbeat.
    pub fn tick(
        &mut self,
        table: &mut MembershipTable,
        local: Heartbeat,
        now: Timestamp,
    ) -> GossipRound {
        table.refresh(local.at(now));
        let removed = table.sweep(now, self.failure_timeout_ms);

        let skipped = self.rng.random_bool(self.skip_probability);
        let targets: Vec<PeerId> = if skipped {
            Vec::new()
        } else {
            table
                .random_subset(self.fanout, Some(local.peer_id), &mut self.rng)
                .into_iter()
                .map(|entry| entry.peer_id)
                .collect()
        };

        let message = (!targets.is_empty()).then(|| Message::gossip(local, &table.snapshot()));

        GossipRound {
            removed,
            skipped,
            targets,
            message,
        }
    }

    /// Merge a received gossip (or join reply): the sender's own heartbeat
    /// plus its snapshot. Returns the peers that were new to us.
    ///
    /// Only the sender's heartbeat can lift a tombstone.
    pub fn absorb(
        table: &mut MembershipTable,
        sender: Heartbeat,
        snapshot: &[Heartbeat],
        now: Timestamp,
    ) -> Vec<PeerId> {
        let mut added = Vec::new();
        if table.revive(sender.peer_id, sender.incarnation, now).is_inserted() {
            added.push(sender.peer_id);
        }
        for hb in snapshot {
            if table.observe(hb.peer_id, hb.incarnation, now).is_inserted() {
                added.push(hb.peer_id);
            }
        }
        added
    }
}

fn peer_salt(peer_id: PeerId) -> u64 {
    ((u64::from(peer_id.host()) << 16) | u64::from(peer_id.port()))
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
