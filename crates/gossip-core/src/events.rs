//! Membership events for observability.
//!
//! `MembershipEvent` is published whenever the local view changes; the
//! `EventBus` fans it out to subscribers. Subscribers are fire-and-forget:
//! nothing they do feeds back into the protocol.

use crate::PeerId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Changes to the local membership view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MembershipEvent {
    /// A peer entered the local table.
    PeerAdded {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        /// Local clock time in milliseconds.
        at: u64,
    },
    /// A peer was evicted after its heartbeat went quiet.
    PeerRemoved {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        at: u64,
    },
    /// This node is now part of the group.
    Joined { at: u64 },
    /// The rendezvous never answered.
    JoinFailed { attempts: u32 },
    /// This node left the group and cleared its table.
    Left,
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&MembershipEvent) + Send + Sync>;

/// Event bus for publishing membership events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&MembershipEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(cb_id, _)| *cb_id != id);
    }

    /// Deliver an event to every subscriber.
    pub fn publish(&self, event: MembershipEvent) {
        // Clone callbacks out so a subscriber may subscribe/unsubscribe
        // without deadlocking.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Collects every published event. Handy for tests and simulations.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<std::sync::Mutex<Vec<MembershipEvent>>>,
}

impl EventLog {
    /// Start recording everything published on `bus`.
    pub fn attach(bus: &Arc<EventBus>) -> (Self, Subscription) {
        let log = Self::default();
        let sink = log.clone();
        let subscription = bus.subscribe(move |event| {
            sink.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
        });
        (log, subscription)
    }

    pub fn events(&self) -> Vec<MembershipEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many times `peer_id` was removed.
    pub fn removals_of(&self, peer_id: PeerId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MembershipEvent::PeerRemoved { peer_id: p, .. } if *p == peer_id))
            .count()
    }

    /// How many times `peer_id` was added.
    pub fn additions_of(&self, peer_id: PeerId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MembershipEvent::PeerAdded { peer_id: p, .. } if *p == peer_id))
            .count()
    }
}
