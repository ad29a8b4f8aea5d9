//! A group member: one node's protocol state and control loop.
//!
//! `MembershipNode` owns the membership table and is the only thing that
//! mutates it. The caller drives it from a single thread of control:
//!
//! ```text
//! loop {
//!     node.node_loop();   // drain inbound, dispatch, then tick
//!     sleep(tick_interval);
//! }
//! ```
//!
//! or, with an async runtime, by calling [`MembershipNode::check_messages`]
//! when the transport is readable and [`MembershipNode::tick`] on a timer,
//! both from the same task.

use crate::PeerId;
use crate::clock::Clock;
use crate::config::{ConfigError, MembershipConfig};
use crate::events::{EventBus, MembershipEvent};
use crate::gossip::{GossipEngine, GossipRound};
use crate::join::{JoinAction, JoinProtocol, JoinState};
use crate::membership::{MembershipEntry, MembershipTable};
use crate::protocol::{self, CodecError, Heartbeat, Message};
use crate::transport::Transport;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("local address is null; cannot identify this node")]
    NullPeerId,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// One member of the group.
pub struct MembershipNode<T: Transport, C: Clock> {
    local: PeerId,
    /// Our heartbeat, bumped every in-group tick
    incarnation: u64,
    table: MembershipTable,
    join: JoinProtocol,
    gossip: GossipEngine,
    transport: T,
    clock: C,
    events: Arc<EventBus>,
}

impl<T: Transport, C: Clock> MembershipNode<T, C> {
    /// Create a node listening at the transport's local address.
    ///
    /// Fails if that address is null or the configuration is invalid.
    pub fn new(config: MembershipConfig, transport: T, clock: C) -> Result<Self, NodeError> {
        config.validate()?;
        let local = transport.local_peer_id();
        if local.is_null() {
            return Err(NodeError::NullPeerId);
        }

        Ok(Self {
            local,
            incarnation: 0,
            table: MembershipTable::new(config.valid_peers.clone(), config.tombstone_ttl_ms()),
            join: JoinProtocol::new(config.rendezvous, config.join_retry.clone()),
            gossip: GossipEngine::new(&config, local),
            transport,
            clock,
            events: Arc::new(EventBus::new()),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    /// Our own freshest entry.
    pub fn self_entry(&self) -> Heartbeat {
        Heartbeat::new(self.local, self.incarnation)
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    pub fn join_state(&self) -> JoinState {
        self.join.state()
    }

    pub fn is_in_group(&self) -> bool {
        self.join.is_in_group()
    }

    /// Event bus for `PeerAdded` / `PeerRemoved` notifications.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Introduce ourselves to the group.
    ///
    /// The rendezvous node is in the group immediately; everyone else sends
    /// a join request and waits for the reply.
    pub fn start(&mut self) {
        let now = self.clock.now_ms();
        let action = self.join.start(self.local, now);
        self.apply_join_action(action, now);
    }

    /// Drain inbound messages, then run the periodic duties.
    pub fn node_loop(&mut self) -> Option<GossipRound> {
        if self.join.state() == JoinState::Left {
            return None;
        }
        self.check_messages();
        self.tick()
    }

    /// Dispatch every message currently queued on the transport.
    ///
    /// Malformed messages are dropped. Returns how many were processed.
    pub fn check_messages(&mut self) -> usize {
        let mut processed = 0;
        loop {
            match self.transport.try_recv() {
                Ok(Some(data)) => {
                    if let Err(e) = self.handle_message(&data) {
                        debug!("{}: dropping message: {}", self.local, e);
                    }
                    processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{}: receive failed: {}", self.local, e);
                    break;
                }
            }
        }
        processed
    }

    /// Decode and dispatch one message.
    ///
    /// A malformed message is rejected before it can touch the table.
    pub fn handle_message(&mut self, data: &[u8]) -> Result<(), CodecError> {
        if self.join.state() == JoinState::Left {
            return Ok(());
        }

        let message = protocol::decode(data)?;
        let now = self.clock.now_ms();
        debug!(
            "{}: {:?} from {} ({} entries)",
            self.local,
            message.kind(),
            message.sender().peer_id,
            message.snapshot().len()
        );

        match message {
            Message::JoinRequest { sender } => self.on_join_request(sender, now),
            Message::JoinReply { sender, snapshot } => self.on_join_reply(sender, &snapshot, now),
            Message::Gossip { sender, snapshot } => {
                let added = GossipEngine::absorb(&mut self.table, sender, &snapshot, now);
                self.publish_added(added, now);
            }
        }
        Ok(())
    }

    fn on_join_request(&mut self, requester: Heartbeat, now: u64) {
        if self.table.revive(requester.peer_id, requester.incarnation, now).is_inserted() {
            self.publish_added(vec![requester.peer_id], now);
        }

        let reply = Message::join_reply(self.self_entry(), &self.table.snapshot());
        self.send(requester.peer_id, &reply);
    }

    fn on_join_reply(&mut self, sender: Heartbeat, snapshot: &[Heartbeat], now: u64) {
        let added = GossipEngine::absorb(&mut self.table, sender, snapshot, now);
        self.publish_added(added, now);

        if self.join.complete() {
            info!(
                "{}: joined the group via {} ({} known peers)",
                self.local,
                sender.peer_id,
                self.table.len()
            );
            self.events.publish(MembershipEvent::Joined { at: now });
        }
    }

    /// Run one round of periodic duties.
    ///
    /// While pending this only checks the join retry timer. Once in the
    /// group it bumps our heartbeat, evicts silent peers and maybe gossips.
    /// Returns the gossip round when one ran.
    pub fn tick(&mut self) -> Option<GossipRound> {
        let now = self.clock.now_ms();

        match self.join.state() {
            JoinState::Pending { .. } => {
                let action = self.join.poll(now);
                self.apply_join_action(action, now);
                None
            }
            JoinState::InGroup => Some(self.gossip_round(now)),
            JoinState::Idle | JoinState::Failed { .. } | JoinState::Left => None,
        }
    }

    fn gossip_round(&mut self, now: u64) -> GossipRound {
        self.incarnation = self.incarnation.saturating_add(1);
        let local = self.self_entry();
        let round = self.gossip.tick(&mut self.table, local, now);

        for entry in &round.removed {
            self.on_peer_removed(entry, now);
        }
        if let Some(message) = &round.message {
            for target in &round.targets {
                self.send(*target, message);
            }
        }

        round
    }

    fn on_peer_removed(&self, entry: &MembershipEntry, now: u64) {
        info!(
            "{}: removed {} (incarnation {}, silent for {}ms)",
            self.local,
            entry.peer_id,
            entry.incarnation,
            now.saturating_sub(entry.last_seen)
        );
        self.events.publish(MembershipEvent::PeerRemoved {
            peer_id: entry.peer_id,
            at: now,
        });
    }

    fn apply_join_action(&mut self, action: JoinAction, now: u64) {
        match action {
            JoinAction::Wait => {}
            JoinAction::Bootstrapped => {
                info!("{}: starting up group", self.local);
                self.events.publish(MembershipEvent::Joined { at: now });
            }
            JoinAction::SendRequest { to, attempt } => {
                if attempt == 1 {
                    info!("{}: trying to join via {}", self.local, to);
                } else {
                    warn!("{}: no join reply from {}, attempt {}", self.local, to, attempt);
                }
                let request = Message::JoinRequest {
                    sender: self.self_entry(),
                };
                self.send(to, &request);
            }
            JoinAction::GiveUp { attempts } => {
                warn!(
                    "{}: giving up on joining via {} after {} attempts",
                    self.local,
                    self.join.rendezvous(),
                    attempts
                );
                self.events.publish(MembershipEvent::JoinFailed { attempts });
            }
        }
    }

    /// Fire-and-forget send. Failures only cost this round's effect.
    fn send(&self, to: PeerId, message: &Message) {
        let data = protocol::encode(message);
        if let Err(e) = self.transport.send(to, &data) {
            debug!("{}: send {:?} to {} failed: {}", self.local, message.kind(), to, e);
        }
    }

    fn publish_added(&self, added: Vec<PeerId>, now: u64) {
        for peer_id in added {
            info!("{}: added {}", self.local, peer_id);
            self.events.publish(MembershipEvent::PeerAdded { peer_id, at: now });
        }
    }

    /// Leave the group: clear the table and stop all further activity.
    pub fn leave(&mut self) {
        if self.join.state() == JoinState::Left {
            return;
        }
        info!("{}: leaving the group", self.local);
        self.join.leave();
        self.table.clear();
        self.events.publish(MembershipEvent::Left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::JoinRetryConfig;
    use crate::events::EventLog;
    use crate::peer_id::PeerIdRange;
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use std::time::Duration;

    type TestNode = MembershipNode<MemoryTransport, ManualClock>;

    fn peer(host: u32) -> PeerId {
        PeerId::new(host, 0)
    }

    fn config() -> MembershipConfig {
        MembershipConfig {
            rendezvous: peer(1),
            failure_timeout: Duration::from_millis(5000),
            tick_interval: Duration::from_millis(1000),
            skip_probability: 0.0,
            valid_peers: PeerIdRange::hosts(1..=10),
            join_retry: None,
            rng_seed: Some(11),
            ..MembershipConfig::default()
        }
    }

    fn node(network: &MemoryNetwork, clock: &ManualClock, host: u32) -> TestNode {
        MembershipNode::new(config(), network.endpoint(peer(host)), clock.clone()).unwrap()
    }

    fn peek_message(network: &MemoryNetwork, to: PeerId) -> Option<Message> {
        protocol::decode(&network.peek(to)?).ok()
    }

    #[test]
    fn test_null_address_fails_startup() {
        let network = MemoryNetwork::new();
        let result = MembershipNode::new(config(), network.endpoint(PeerId::NULL), ManualClock::new(0));
        assert!(matches!(result, Err(NodeError::NullPeerId)));
    }

    #[test]
    fn test_invalid_config_fails_startup() {
        let network = MemoryNetwork::new();
        let config = MembershipConfig {
            skip_probability: 2.0,
            ..config()
        };
        let result = MembershipNode::new(config, network.endpoint(peer(1)), ManualClock::new(0));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_lone_rendezvous_bootstraps_without_traffic() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut a = node(&network, &clock, 1);

        a.start();

        assert!(a.is_in_group());
        assert!(a.table().is_empty());
        assert_eq!(network.sent_count(), 0);

        // Ticking alone still sends nothing
        for _ in 0..5 {
            clock.advance(1000);
            a.node_loop();
        }
        assert_eq!(network.sent_count(), 0);
        assert_eq!(a.incarnation(), 5);
    }

    #[test]
    fn test_two_node_join_exchange() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut a = node(&network, &clock, 1);
        let mut b = node(&network, &clock, 2);

        a.start();
        b.start();
        assert_eq!(b.join_state(), JoinState::Pending { attempts: 1, next_retry_at: None });
        assert!(b.table().is_empty());

        // A processes JoinRequest{B, 0}
        let request = peek_message(&network, peer(1));
        assert_eq!(request, Some(Message::join_request(peer(2), 0)));
        assert_eq!(a.check_messages(), 1);
        assert!(a.table().contains(&peer(2)));

        // A's reply carries A's own entry and the snapshot including B
        let reply = peek_message(&network, peer(2)).unwrap();
        assert_eq!(reply.sender(), Heartbeat::new(peer(1), 0));
        assert_eq!(reply.snapshot(), &[Heartbeat::new(peer(2), 0)]);

        assert_eq!(b.check_messages(), 1);
        assert!(b.is_in_group());
        assert!(b.table().contains(&peer(1)));
        assert!(b.table().contains(&peer(2)));
    }

    #[test]
    fn test_reply_before_start_does_not_join() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut b = node(&network, &clock, 2);
        let (log, _sub) = EventLog::attach(b.events());

        let reply = Message::join_reply(Heartbeat::new(peer(1), 4), &[]);
        b.handle_message(&protocol::encode(&reply)).unwrap();

        assert_eq!(b.join_state(), JoinState::Idle);
        assert!(!log.events().iter().any(|e| matches!(e, MembershipEvent::Joined { .. })));
        clock.advance(1000);
        assert!(b.tick().is_none());
    }

    #[test]
    fn test_pending_node_does_not_gossip_or_sweep() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut b = node(&network, &clock, 2);
        b.start();
        let sent = network.sent_count();

        clock.advance(60_000);
        assert!(b.node_loop().is_none());
        assert_eq!(b.incarnation(), 0);
        assert_eq!(network.sent_count(), sent);
    }

    #[test]
    fn test_join_retry_then_failure() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let config = MembershipConfig {
            join_retry: Some(JoinRetryConfig {
                initial_delay: Duration::from_millis(1000),
                max_delay: Duration::from_millis(1000),
                backoff_factor: 1.0,
                max_attempts: Some(3),
            }),
            ..config()
        };
        // Rendezvous registered but never started: requests go unanswered
        let _rendezvous = network.endpoint(peer(1));
        let mut b = MembershipNode::new(config, network.endpoint(peer(2)), clock.clone()).unwrap();
        let (log, _sub) = EventLog::attach(b.events());

        b.start();
        for _ in 0..5 {
            clock.advance(1000);
            b.node_loop();
        }

        assert_eq!(network.pending(peer(1)), 3);
        assert_eq!(b.join_state(), JoinState::Failed { attempts: 3 });
        assert!(log.events().contains(&MembershipEvent::JoinFailed { attempts: 3 }));
    }

    #[test]
    fn test_malformed_message_leaves_table_untouched() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut a = node(&network, &clock, 1);
        a.start();
        a.handle_message(&protocol::encode(&Message::join_request(peer(2), 0)))
            .unwrap();
        let before = a.table().snapshot();

        let mut truncated = protocol::encode(&Message::gossip(
            Heartbeat::new(peer(3), 1),
            &[MembershipEntry::new(peer(4), 1, 0)],
        ))
        .to_vec();
        truncated.pop();

        assert!(matches!(
            a.handle_message(&truncated),
            Err(CodecError::MalformedMessage(_))
        ));
        assert!(matches!(
            a.handle_message(&[9, 0, 0]),
            Err(CodecError::MalformedMessage(_))
        ));
        assert_eq!(a.table().snapshot(), before);
    }

    #[test]
    fn test_peer_added_events() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut a = node(&network, &clock, 1);
        let (log, _sub) = EventLog::attach(a.events());
        a.start();

        let gossip = Message::Gossip {
            sender: Heartbeat::new(peer(2), 3),
            snapshot: vec![Heartbeat::new(peer(3), 1), Heartbeat::new(peer(2), 3)],
        };
        a.handle_message(&protocol::encode(&gossip)).unwrap();
        a.handle_message(&protocol::encode(&gossip)).unwrap();

        assert_eq!(log.additions_of(peer(2)), 1);
        assert_eq!(log.additions_of(peer(3)), 1);
    }

    #[test]
    fn test_leave_clears_and_stops() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(0);
        let mut a = node(&network, &clock, 1);
        a.start();
        a.handle_message(&protocol::encode(&Message::join_request(peer(2), 0)))
            .unwrap();
        let sent = network.sent_count();

        a.leave();
        assert!(a.table().is_empty());
        assert_eq!(a.join_state(), JoinState::Left);

        // Further traffic and ticks are ignored
        a.handle_message(&protocol::encode(&Message::join_request(peer(3), 0)))
            .unwrap();
        clock.advance(1000);
        assert!(a.node_loop().is_none());
        assert!(a.table().is_empty());
        assert_eq!(network.sent_count(), sent);
    }
}
