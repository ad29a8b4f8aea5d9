//! Membership table: the local view of known peers.
//!
//! Every fact is reconciled with [`MembershipTable::merge`], which takes the
//! elementwise maximum of incarnation and last-seen time. Information only
//! moves forward, so replaying stale gossip is harmless and merges commute.

use crate::PeerId;
use crate::peer_id::PeerIdRange;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;

/// Local timestamp in milliseconds, as reported by the node's clock.
pub type Timestamp = u64;

/// One known peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipEntry {
    pub peer_id: PeerId,
    /// The peer's self-reported heartbeat counter.
    pub incarnation: u64,
    /// Local time of the last refresh. Never transmitted.
    pub last_seen: Timestamp,
}

impl MembershipEntry {
    pub fn new(peer_id: PeerId, incarnation: u64, last_seen: Timestamp) -> Self {
        Self {
            peer_id,
            incarnation,
            last_seen,
        }
    }
}

/// Result of merging one entry into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First time this peer was seen
    Inserted,
    /// Existing entry moved forward
    Updated,
    /// Nothing newer than what we already had
    Unchanged,
    /// Outside the valid range, or tombstoned
    Rejected,
}

impl MergeOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// A recently evicted peer. Blocks re-insertion until it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tombstone {
    incarnation: u64,
    removed_at: Timestamp,
}

/// Mapping from PeerId to its latest known entry.
#[derive(Debug, Clone)]
pub struct MembershipTable {
    entries: BTreeMap<PeerId, MembershipEntry>,
    tombstones: BTreeMap<PeerId, Tombstone>,
    valid: PeerIdRange,
    tombstone_ttl: u64,
}

impl MembershipTable {
    /// Create an empty table accepting peers within `valid`.
    ///
    /// Evicted peers stay blocked for `tombstone_ttl` milliseconds.
    pub fn new(valid: PeerIdRange, tombstone_ttl: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            valid,
            tombstone_ttl,
        }
    }

    /// Merge one entry.
    ///
    /// Unseen peers are inserted; known peers take the maximum of each field.
    pub fn merge(&mut self, entry: MembershipEntry) -> MergeOutcome {
        if !self.valid.contains(&entry.peer_id) || self.tombstones.contains_key(&entry.peer_id) {
            return MergeOutcome::Rejected;
        }

        match self.entries.get_mut(&entry.peer_id) {
            Some(existing) => {
                let incarnation = existing.incarnation.max(entry.incarnation);
                let last_seen = existing.last_seen.max(entry.last_seen);
                if incarnation == existing.incarnation && last_seen == existing.last_seen {
                    return MergeOutcome::Unchanged;
                }
                existing.incarnation = incarnation;
                existing.last_seen = last_seen;
                MergeOutcome::Updated
            }
            None => {
                self.entries.insert(entry.peer_id, entry);
                MergeOutcome::Inserted
            }
        }
    }

    /// Merge every entry. Returns the peers that were newly inserted.
    pub fn merge_all(&mut self, entries: impl IntoIterator<Item = MembershipEntry>) -> Vec<PeerId> {
        entries
            .into_iter()
            .filter_map(|entry| self.merge(entry).is_inserted().then_some(entry.peer_id))
            .collect()
    }

    /// Merge a fact received over the wire, where no timestamp travels.
    ///
    /// The fact is stamped with `now` only if it is news: an unknown peer or
    /// a higher incarnation. Repeating a known incarnation does not count as
    /// a sign of life, so a silent peer ages out even while others keep
    /// gossiping about it.
    pub fn observe(&mut self, peer_id: PeerId, incarnation: u64, now: Timestamp) -> MergeOutcome {
        let last_seen = match self.entries.get(&peer_id) {
            Some(existing) if incarnation <= existing.incarnation => existing.last_seen,
            _ => now,
        };
        self.merge(MembershipEntry::new(peer_id, incarnation, last_seen))
    }

    /// Merge a heartbeat the peer sent about itself.
    ///
    /// A message straight from the peer is proof of life, so a tombstone
    /// for it is lifted first. Hearsay about a dead peer stays blocked.
    pub fn revive(&mut self, peer_id: PeerId, incarnation: u64, now: Timestamp) -> MergeOutcome {
        if self.valid.contains(&peer_id) {
            self.tombstones.remove(&peer_id);
        }
        self.observe(peer_id, incarnation, now)
    }

    /// Remove every entry with `now - last_seen > timeout`.
    ///
    /// Returns the removed entries. Each leaves a tombstone; expired
    /// tombstones are dropped.
    pub fn sweep(&mut self, now: Timestamp, timeout: u64) -> Vec<MembershipEntry> {
        let mut kept = BTreeMap::new();
        let mut removed = Vec::new();

        for (peer_id, entry) in std::mem::take(&mut self.entries) {
            if now.saturating_sub(entry.last_seen) > timeout {
                removed.push(entry);
            } else {
                kept.insert(peer_id, entry);
            }
        }
        self.entries = kept;

        let ttl = self.tombstone_ttl;
        self.tombstones
            .retain(|_, tombstone| now.saturating_sub(tombstone.removed_at) <= ttl);
        for entry in &removed {
            self.tombstones.insert(
                entry.peer_id,
                Tombstone {
                    incarnation: entry.incarnation,
                    removed_at: now,
                },
            );
        }

        removed
    }

    /// Up to `k` entries chosen uniformly at random without replacement.
    pub fn random_subset<R: Rng + ?Sized>(
        &self,
        k: usize,
        exclude: Option<PeerId>,
        rng: &mut R,
    ) -> Vec<MembershipEntry> {
        let candidates: Vec<&MembershipEntry> = self
            .entries
            .values()
            .filter(|e| Some(e.peer_id) != exclude)
            .collect();

        candidates
            .choose_multiple(rng, k)
            .map(|e| **e)
            .collect()
    }

    /// Overwrite the local peer's own entry.
    ///
    /// Only applies when the local peer is already known (learned back via
    /// gossip); the heartbeat keeps it from ever aging out locally.
    pub(crate) fn refresh(&mut self, entry: MembershipEntry) {
        if let Some(existing) = self.entries.get_mut(&entry.peer_id) {
            existing.incarnation = existing.incarnation.max(entry.incarnation);
            existing.last_seen = existing.last_seen.max(entry.last_seen);
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&MembershipEntry> {
        self.entries.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.entries.contains_key(peer_id)
    }

    /// Whether a recently evicted peer is still blocked.
    pub fn is_tombstoned(&self, peer_id: &PeerId) -> bool {
        self.tombstones.contains_key(peer_id)
    }

    /// Incarnation the peer had when it was evicted.
    pub fn tombstone_incarnation(&self, peer_id: &PeerId) -> Option<u64> {
        self.tombstones.get(peer_id).map(|t| t.incarnation)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MembershipEntry> {
        self.entries.values()
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.entries.keys().copied()
    }

    /// Read-only copy of every entry, for outgoing messages.
    pub fn snapshot(&self) -> Vec<MembershipEntry> {
        self.entries.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything, tombstones included.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tombstones.clear();
    }
}
