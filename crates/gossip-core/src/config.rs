//! Protocol configuration.

use crate::PeerId;
use crate::peer_id::PeerIdRange;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("skip probability must be within [0, 1], got {0}")]
    SkipProbability(f64),
    #[error("fanout must be at least 1")]
    ZeroFanout,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("rendezvous address must not be null")]
    NullRendezvous,
    #[error("join backoff factor must be at least 1, got {0}")]
    BackoffFactor(f64),
}

/// Default failure timeout, in tick intervals. Must span several gossip
/// rounds, since a fresh heartbeat reaches one peer per tick.
pub const DEFAULT_TIMEOUT_TICKS: u32 = 20;

/// Retry policy for an unanswered join request.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRetryConfig {
    /// Delay before the first resend
    pub initial_delay: Duration,
    /// Maximum delay between resends
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Total join requests to send before giving up (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl JoinRetryConfig {
    /// Delay after the `attempt`-th request (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay_secs = self.initial_delay.as_secs_f64()
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Whether `attempts` requests exhaust the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for JoinRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: Some(5),
        }
    }
}

/// Settings shared by every node in a group.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipConfig {
    /// Well-known address new nodes contact to join
    pub rendezvous: PeerId,
    /// Silence after which a peer is evicted (default: 20 ticks)
    pub failure_timeout: Duration,
    /// Period of the gossip/sweep tick (default: 1s)
    pub tick_interval: Duration,
    /// Chance that a round sends nothing (default: 1/6)
    pub skip_probability: f64,
    /// Peers to gossip to per round (default: 1)
    pub fanout: usize,
    /// How long an evicted peer stays blocked (default: 2 × failure_timeout)
    pub tombstone_ttl: Duration,
    /// Identifiers accepted into the table
    pub valid_peers: PeerIdRange,
    /// Join request retry policy (None = send once, wait forever)
    pub join_retry: Option<JoinRetryConfig>,
    /// Seed for peer selection and skip decisions (None = from the OS)
    pub rng_seed: Option<u64>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        let tick_interval = Duration::from_secs(1);
        let failure_timeout = tick_interval * DEFAULT_TIMEOUT_TICKS;
        Self {
            rendezvous: PeerId::new(1, 0),
            failure_timeout,
            tick_interval,
            skip_probability: 1.0 / 6.0,
            fanout: 1,
            tombstone_ttl: failure_timeout * 2,
            valid_peers: PeerIdRange::any(),
            join_retry: Some(JoinRetryConfig::default()),
            rng_seed: None,
        }
    }
}

impl MembershipConfig {
    /// Default settings joining through `rendezvous`.
    pub fn with_rendezvous(rendezvous: PeerId) -> Self {
        Self {
            rendezvous,
            ..Self::default()
        }
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.skip_probability) {
            return Err(ConfigError::SkipProbability(self.skip_probability));
        }
        if self.fanout == 0 {
            return Err(ConfigError::ZeroFanout);
        }
        if self.failure_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("failure_timeout"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("tick_interval"));
        }
        if self.rendezvous.is_null() {
            return Err(ConfigError::NullRendezvous);
        }
        if let Some(retry) = &self.join_retry
            && (retry.backoff_factor.is_nan() || retry.backoff_factor < 1.0)
        {
            return Err(ConfigError::BackoffFactor(retry.backoff_factor));
        }
        Ok(())
    }

    pub(crate) fn failure_timeout_ms(&self) -> u64 {
        self.failure_timeout.as_millis() as u64
    }

    pub(crate) fn tombstone_ttl_ms(&self) -> u64 {
        self.tombstone_ttl.as_millis() as u64
    }
}
