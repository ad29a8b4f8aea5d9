//! Transport trait for delivering membership messages.
//!
//! Implementations:
//! - In-memory: [`MemoryNetwork`] queues for tests and simulations
//! - UDP: `gossip-daemon`'s socket transport
//!
//! Delivery is best effort. Sends never block and are never acknowledged.

use crate::PeerId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Moves raw message bytes between peers.
pub trait Transport {
    /// Address this transport sends from.
    fn local_peer_id(&self) -> PeerId;

    /// Fire-and-forget send.
    fn send(&self, to: PeerId, data: &[u8]) -> Result<()>;

    /// Next queued inbound message, or `None` when nothing is waiting.
    fn try_recv(&self) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Default)]
struct NetworkState {
    queues: HashMap<PeerId, VecDeque<Vec<u8>>>,
    down: HashSet<PeerId>,
    sent: usize,
    dropped: usize,
}

/// An in-process network of message queues, one per registered peer.
///
/// Cloning shares the same network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `peer_id` and return its transport endpoint.
    pub fn endpoint(&self, peer_id: PeerId) -> MemoryTransport {
        self.lock().queues.entry(peer_id).or_default();
        MemoryTransport {
            network: self.clone(),
            local: peer_id,
        }
    }

    /// Mark a peer as crashed (`true`) or recovered (`false`).
    ///
    /// Messages to a down peer are silently lost and its own sends fail.
    pub fn set_down(&self, peer_id: PeerId, down: bool) {
        let mut state = self.lock();
        if down {
            state.down.insert(peer_id);
            if let Some(queue) = state.queues.get_mut(&peer_id) {
                queue.clear();
            }
        } else {
            state.down.remove(&peer_id);
        }
    }

    /// Messages accepted for delivery so far.
    pub fn sent_count(&self) -> usize {
        self.lock().sent
    }

    /// Messages lost because their target was down.
    pub fn dropped_count(&self) -> usize {
        self.lock().dropped
    }

    /// Messages waiting in `peer_id`'s queue.
    pub fn pending(&self, peer_id: PeerId) -> usize {
        self.lock().queues.get(&peer_id).map_or(0, VecDeque::len)
    }

    /// Copy of the oldest message waiting for `peer_id`, left in place.
    pub fn peek(&self, peer_id: PeerId) -> Option<Vec<u8>> {
        self.lock().queues.get(&peer_id)?.front().cloned()
    }
}

/// One peer's view of a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerId,
}

impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    fn send(&self, to: PeerId, data: &[u8]) -> Result<()> {
        let mut state = self.network.lock();
        if state.down.contains(&self.local) {
            return Err(TransportError::Unavailable(format!("{} is down", self.local)));
        }
        if state.down.contains(&to) {
            state.dropped += 1;
            return Ok(());
        }

        let queue = state
            .queues
            .get_mut(&to)
            .ok_or_else(|| TransportError::SendFailed(format!("no route to {to}")))?;
        queue.push_back(data.to_vec());
        state.sent += 1;
        Ok(())
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.network.lock();
        if state.down.contains(&self.local) {
            return Ok(None);
        }
        Ok(state
            .queues
            .get_mut(&self.local)
            .and_then(VecDeque::pop_front))
    }
}
