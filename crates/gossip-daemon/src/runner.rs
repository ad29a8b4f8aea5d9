//! Event loop running one membership node over UDP.
//!
//! The node is owned by a single task. `tokio::select!` serializes socket
//! readiness, the gossip tick and shutdown, so the table needs no lock.

use crate::udp::UdpTransport;
use gossip_core::{
    EventBus, JoinState, MembershipConfig, MembershipNode, NodeError, PeerId, SystemClock,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to start node: {0}")]
    Node(#[from] NodeError),
    #[error("no join reply from {rendezvous} after {attempts} attempts")]
    JoinFailed { rendezvous: PeerId, attempts: u32 },
}

/// One group member bound to a UDP socket.
pub struct Daemon {
    node: MembershipNode<UdpTransport, SystemClock>,
    rendezvous: PeerId,
    tick_interval: Duration,
}

impl Daemon {
    pub fn new(transport: UdpTransport, config: MembershipConfig) -> Result<Self, DaemonError> {
        let rendezvous = config.rendezvous;
        let tick_interval = config.tick_interval;
        let node = MembershipNode::new(config, transport, SystemClock::new())?;
        Ok(Self {
            node,
            rendezvous,
            tick_interval,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.node.local_peer_id()
    }

    /// Subscribe here before calling [`Daemon::run`].
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(self.node.events())
    }

    /// Join the group and run until `shutdown` resolves.
    ///
    /// On shutdown the node leaves the group. Returns an error if the join
    /// is abandoned.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), DaemonError> {
        let socket = self.node.transport().socket();
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "{}: node running (rendezvous {}, tick {:?})",
            self.node.local_peer_id(),
            self.rendezvous,
            self.tick_interval
        );
        self.node.start();

        loop {
            tokio::select! {
                ready = socket.readable() => {
                    match ready {
                        Ok(()) => {
                            self.node.check_messages();
                        }
                        Err(e) => {
                            error!("Socket not readable: {}", e);
                        }
                    }
                }

                _ = interval.tick() => {
                    self.node.tick();
                    if let JoinState::Failed { attempts } = self.node.join_state() {
                        warn!("Join abandoned, shutting down");
                        self.node.leave();
                        return Err(DaemonError::JoinFailed {
                            rendezvous: self.rendezvous,
                            attempts,
                        });
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.node.leave();
        Ok(())
    }
}
