//! Join protocol: getting a node into the group.
//!
//! A node whose own address is the rendezvous bootstraps the group alone.
//! Every other node sends a join request to the rendezvous and stays
//! pending (no gossip, no sweeping) until a join reply arrives carrying the
//! replier's whole table.
//!
//! Unanswered requests are resent with exponential backoff when a
//! [`JoinRetryConfig`] is set; once its attempts run out the node gives up
//! and reports [`JoinState::Failed`]. Without one, the request is sent once
//! and the node waits indefinitely.

use crate::PeerId;
use crate::config::JoinRetryConfig;
use crate::membership::Timestamp;

/// Where a node is in the join lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Constructed, not started
    Idle,
    /// Join request sent, waiting for a reply
    Pending {
        /// Join requests sent so far
        attempts: u32,
        /// When to resend (None = never)
        next_retry_at: Option<Timestamp>,
    },
    /// Participating in gossip and failure detection
    InGroup,
    /// Gave up after `attempts` unanswered requests
    Failed { attempts: u32 },
    /// Left the group; terminal
    Left,
}

/// What the node must do after starting or polling the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAction {
    /// Nothing to send
    Wait,
    /// We are the rendezvous: the group now exists
    Bootstrapped,
    /// Send a join request to the rendezvous
    SendRequest { to: PeerId, attempt: u32 },
    /// Retries exhausted
    GiveUp { attempts: u32 },
}

/// Join state machine.
#[derive(Debug, Clone)]
pub struct JoinProtocol {
    rendezvous: PeerId,
    retry: Option<JoinRetryConfig>,
    state: JoinState,
}

impl JoinProtocol {
    pub fn new(rendezvous: PeerId, retry: Option<JoinRetryConfig>) -> Self {
        Self {
            rendezvous,
            retry,
            state: JoinState::Idle,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn rendezvous(&self) -> PeerId {
        self.rendezvous
    }

    pub fn is_in_group(&self) -> bool {
        self.state == JoinState::InGroup
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, JoinState::Pending { .. })
    }

    /// Begin joining. Only acts from `Idle`.
    pub fn start(&mut self, local: PeerId, now: Timestamp) -> JoinAction {
        if self.state != JoinState::Idle {
            return JoinAction::Wait;
        }

        if local == self.rendezvous {
            self.state = JoinState::InGroup;
            return JoinAction::Bootstrapped;
        }

        self.send_attempt(1, now)
    }

    /// Check the retry timer while pending.
    pub fn poll(&mut self, now: Timestamp) -> JoinAction {
        let JoinState::Pending {
            attempts,
            next_retry_at: Some(at),
        } = self.state
        else {
            return JoinAction::Wait;
        };
        if now < at {
            return JoinAction::Wait;
        }

        let exhausted = self
            .retry
            .as_ref()
            .is_some_and(|retry| retry.exhausted(attempts));
        if exhausted {
            self.state = JoinState::Failed { attempts };
            return JoinAction::GiveUp { attempts };
        }

        self.send_attempt(attempts + 1, now)
    }

    fn send_attempt(&mut self, attempt: u32, now: Timestamp) -> JoinAction {
        let next_retry_at = self
            .retry
            .as_ref()
            .map(|retry| now + retry.backoff(attempt).as_millis() as u64);
        self.state = JoinState::Pending {
            attempts: attempt,
            next_retry_at,
        };
        JoinAction::SendRequest {
            to: self.rendezvous,
            attempt,
        }
    }

    /// A join reply arrived. Returns true if this completed the join.
    ///
    /// A late reply still rescues a node that already gave up. A reply to
    /// a node that never asked is ignored.
    pub fn complete(&mut self) -> bool {
        match self.state {
            JoinState::Pending { .. } | JoinState::Failed { .. } => {
                self.state = JoinState::InGroup;
                true
            }
            JoinState::Idle | JoinState::InGroup | JoinState::Left => false,
        }
    }

    pub fn leave(&mut self) {
        self.state = JoinState::Left;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rendezvous() -> PeerId {
        PeerId::new(1, 0)
    }

    fn joiner() -> PeerId {
        PeerId::new(2, 0)
    }

    fn retry(max_attempts: Option<u32>) -> JoinRetryConfig {
        JoinRetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            backoff_factor: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_rendezvous_bootstraps_alone() {
        let mut join = JoinProtocol::new(rendezvous(), Some(retry(Some(3))));

        assert_eq!(join.start(rendezvous(), 0), JoinAction::Bootstrapped);
        assert!(join.is_in_group());
    }

    #[test]
    fn test_joiner_sends_request_and_waits() {
        let mut join = JoinProtocol::new(rendezvous(), Some(retry(Some(3))));

        assert_eq!(
            join.start(joiner(), 1000),
            JoinAction::SendRequest {
                to: rendezvous(),
                attempt: 1
            }
        );
        assert_eq!(
            join.state(),
            JoinState::Pending {
                attempts: 1,
                next_retry_at: Some(1100)
            }
        );
        assert!(!join.is_in_group());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut join = JoinProtocol::new(rendezvous(), None);
        join.start(joiner(), 0);

        assert_eq!(join.start(joiner(), 10), JoinAction::Wait);
    }

    #[test]
    fn test_retries_with_backoff_then_gives_up() {
        let mut join = JoinProtocol::new(rendezvous(), Some(retry(Some(3))));
        join.start(joiner(), 0);

        // Not due yet
        assert_eq!(join.poll(99), JoinAction::Wait);

        // Second attempt at 100, next due 100 + 200
        assert!(matches!(join.poll(100), JoinAction::SendRequest { attempt: 2, .. }));
        assert_eq!(join.poll(299), JoinAction::Wait);

        // Third attempt at 300, next due 300 + 400
        assert!(matches!(join.poll(300), JoinAction::SendRequest { attempt: 3, .. }));
        assert_eq!(join.poll(699), JoinAction::Wait);

        assert_eq!(join.poll(700), JoinAction::GiveUp { attempts: 3 });
        assert_eq!(join.state(), JoinState::Failed { attempts: 3 });
        assert_eq!(join.poll(10_000), JoinAction::Wait);
    }

    #[test]
    fn test_without_retry_stays_pending_forever() {
        let mut join = JoinProtocol::new(rendezvous(), None);
        join.start(joiner(), 0);

        assert_eq!(join.poll(u64::MAX), JoinAction::Wait);
        assert!(join.is_pending());
    }

    #[test]
    fn test_reply_completes_join() {
        let mut join = JoinProtocol::new(rendezvous(), Some(retry(None)));
        join.start(joiner(), 0);

        assert!(join.complete());
        assert!(join.is_in_group());
        // Duplicate replies don't re-join
        assert!(!join.complete());
        assert_eq!(join.poll(1_000_000), JoinAction::Wait);
    }

    #[test]
    fn test_late_reply_rescues_failed_join() {
        let mut join = JoinProtocol::new(rendezvous(), Some(retry(Some(1))));
        join.start(joiner(), 0);
        assert_eq!(join.poll(100), JoinAction::GiveUp { attempts: 1 });

        assert!(join.complete());
        assert!(join.is_in_group());
    }

    #[test]
    fn test_stray_reply_before_start_is_ignored() {
        let mut join = JoinProtocol::new(rendezvous(), None);

        assert!(!join.complete());
        assert_eq!(join.state(), JoinState::Idle);
    }

    #[test]
    fn test_left_is_terminal() {
        let mut join = JoinProtocol::new(rendezvous(), None);
        join.start(rendezvous(), 0);
        join.leave();

        assert!(!join.complete());
        assert_eq!(join.state(), JoinState::Left);
    }
}
