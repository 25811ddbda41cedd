//! Leader Election Module
//!
//! Lease-based leader election: the coordinator state machine and the
//! dispatcher that delivers role-change callbacks to the host.

mod coordinator;
mod dispatcher;

pub use coordinator::{ElectionHandle, LeaderElector, Role};
pub use dispatcher::{LeaderCallbacks, NewLeaderFn, StartedLeadingFn, StoppedLeadingFn};

use std::time::Duration;

use crate::error::{Error, Result};
use crate::timing::Timing;

/// Follower polls wait at most twice the retry period
const MAX_JITTER_FACTOR: f64 = 1.0;

/// Election configuration
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Identity written into the lease while leading; unique per participant
    pub identity: String,
    /// How long a lease stays valid after its last renewal
    pub lease_duration: Duration,
    /// How long a leader keeps leading without a successful renewal
    pub renew_deadline: Duration,
    /// Follower poll interval and backoff after failed store calls
    pub retry_period: Duration,
    /// Renewal attempts per renew deadline (renew tick = deadline / attempts)
    pub renew_attempts: u32,
    /// Bound on a single store call; defaults to half the retry period
    pub store_timeout: Option<Duration>,
    /// Upward jitter applied to follower polls, as a fraction of the retry period
    pub jitter_factor: f64,
    /// Clear the holder in the record when cancelled while leading
    pub release_on_cancel: bool,
}

impl ElectionConfig {
    /// Configuration with default timings for `identity`
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            renew_attempts: 2,
            store_timeout: None,
            jitter_factor: 0.0,
            release_on_cancel: false,
        }
    }

    /// Effective bound on a single store call
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout.unwrap_or(self.retry_period / 2)
    }

    /// Timing engine for these durations
    pub fn timing(&self) -> Timing {
        Timing::new(
            self.lease_duration,
            self.renew_deadline,
            self.retry_period,
            self.renew_attempts,
            self.jitter_factor,
        )
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.identity.is_empty() {
            return Err(Error::Config("election identity cannot be empty".into()));
        }

        if self.retry_period.is_zero() {
            return Err(Error::Config("retry period must be greater than zero".into()));
        }

        if self.renew_deadline >= self.lease_duration {
            return Err(Error::Config(format!(
                "renew deadline ({:?}) must be shorter than lease duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }

        if self.retry_period >= self.renew_deadline {
            return Err(Error::Config(format!(
                "retry period ({:?}) must be shorter than renew deadline ({:?})",
                self.retry_period, self.renew_deadline
            )));
        }

        if self.renew_attempts == 0 {
            return Err(Error::Config("renew attempts must be at least 1".into()));
        }

        let store_timeout = self.store_timeout();
        if store_timeout.is_zero() || store_timeout >= self.retry_period {
            return Err(Error::Config(format!(
                "store timeout ({:?}) must be non-zero and shorter than retry period ({:?})",
                store_timeout, self.retry_period
            )));
        }

        if !self.jitter_factor.is_finite()
            || self.jitter_factor < 0.0
            || self.jitter_factor > MAX_JITTER_FACTOR
        {
            return Err(Error::Config(format!(
                "jitter factor must be between 0 and {}, got {}",
                MAX_JITTER_FACTOR, self.jitter_factor
            )));
        }

        Ok(())
    }
}
