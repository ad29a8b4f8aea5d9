//! End-to-end tests for gossip-daemon.
//!
//! Runs real daemons on loopback UDP sockets and watches their membership
//! events.

use std::time::Duration;

use gossip_core::{
    EventLog, JoinRetryConfig, MembershipConfig, MembershipEvent, PeerId, Subscription, Transport,
};
use gossip_daemon::{Daemon, DaemonError, UdpTransport};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// A daemon running on its own task.
struct RunningNode {
    peer_id: PeerId,
    log: EventLog,
    _subscription: Subscription,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), DaemonError>>,
}

impl RunningNode {
    async fn bind() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("Failed to bind")
    }

    fn spawn(transport: UdpTransport, rendezvous: PeerId, join_retry: Option<JoinRetryConfig>) -> Self {
        let config = MembershipConfig {
            rendezvous,
            failure_timeout: Duration::from_millis(2000),
            tick_interval: Duration::from_millis(50),
            skip_probability: 0.0,
            join_retry,
            rng_seed: Some(1),
            ..MembershipConfig::default()
        };
        let daemon = Daemon::new(transport, config).expect("Failed to create daemon");
        let peer_id = daemon.local_peer_id();
        let (log, subscription) = EventLog::attach(&daemon.events());

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(daemon.run(async {
            let _ = rx.await;
        }));

        Self {
            peer_id,
            log,
            _subscription: subscription,
            shutdown: Some(tx),
            handle,
        }
    }

    /// Wait until an event matching `pred` has been published.
    async fn wait_for(&self, what: &str, pred: impl Fn(&MembershipEvent) -> bool) {
        let found = timeout(Duration::from_secs(5), async {
            loop {
                if self.log.events().iter().any(&pred) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(found.is_ok(), "{} never saw {}", self.peer_id, what);
    }

    async fn stop(mut self) -> Result<(), DaemonError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("Daemon did not stop")
            .expect("Daemon task panicked")
    }
}

#[tokio::test]
async fn test_two_daemons_join_over_udp() {
    let transport_a = RunningNode::bind().await;
    let rendezvous = transport_a.local_peer_id();
    let a = RunningNode::spawn(transport_a, rendezvous, None);

    let transport_b = RunningNode::bind().await;
    let b = RunningNode::spawn(transport_b, rendezvous, None);
    let b_id = b.peer_id;

    b.wait_for("joined", |e| matches!(e, MembershipEvent::Joined { .. }))
        .await;
    b.wait_for("rendezvous added", |e| {
        matches!(e, MembershipEvent::PeerAdded { peer_id, .. } if *peer_id == rendezvous)
    })
    .await;
    a.wait_for("joiner added", |e| {
        matches!(e, MembershipEvent::PeerAdded { peer_id, .. } if *peer_id == b_id)
    })
    .await;

    // Heartbeats keep both alive well past the failure timeout
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(a.log.removals_of(b_id), 0);
    assert_eq!(b.log.removals_of(rendezvous), 0);

    b.stop().await.expect("b exits cleanly");
    a.wait_for("joiner removed", |e| {
        matches!(e, MembershipEvent::PeerRemoved { peer_id, .. } if *peer_id == b_id)
    })
    .await;
    assert_eq!(a.log.removals_of(b_id), 1);

    let a_log = a.log.clone();
    a.stop().await.expect("a exits cleanly");
    assert_eq!(a_log.events().last(), Some(&MembershipEvent::Left));
}

#[tokio::test]
async fn test_join_fails_without_rendezvous() {
    // Reserve a port, then close it so nobody answers there
    let silent = RunningNode::bind().await.local_peer_id();

    let transport = RunningNode::bind().await;
    let node = RunningNode::spawn(
        transport,
        silent,
        Some(JoinRetryConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_attempts: Some(3),
        }),
    );

    node.wait_for("join failure", |e| {
        matches!(e, MembershipEvent::JoinFailed { attempts: 3 })
    })
    .await;

    let result = timeout(Duration::from_secs(5), node.handle)
        .await
        .expect("Daemon did not exit")
        .expect("Daemon task panicked");
    assert!(matches!(
        result,
        Err(DaemonError::JoinFailed { attempts: 3, .. })
    ));
}
