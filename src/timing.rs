//! Timing Engine
//!
//! Pure decisions over the configured durations: lease expiry, acquisition
//! eligibility, the local renew deadline, and retry/renew intervals.
//! Also hosts the wall-clock seam used to stamp and judge lease records.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::record::LeaseRecord;

/// Source of wall-clock time for lease timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock derived from the tokio monotonic clock.
///
/// Starts at a fixed wall time and advances with `tokio::time::Instant`, so it
/// never jumps backwards and follows paused test time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_origin: DateTime<Utc>,
    instant_origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            instant_origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.instant_origin.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.wall_origin + elapsed,
            Err(_) => self.wall_origin,
        }
    }
}

/// Timing decisions for one election group
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
    renew_attempts: u32,
    jitter_factor: f64,
}

impl Timing {
    pub fn new(
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
        renew_attempts: u32,
        jitter_factor: f64,
    ) -> Self {
        Self {
            lease_duration,
            renew_deadline,
            retry_period,
            renew_attempts: renew_attempts.max(1),
            jitter_factor: jitter_factor.max(0.0),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn renew_deadline(&self) -> Duration {
        self.renew_deadline
    }

    /// `now - renewTime > leaseDuration`.
    /// A renew time in the future (skewed writer) is not expired.
    pub fn is_expired(&self, record: &LeaseRecord, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(record.renew_time).to_std() {
            Ok(elapsed) => elapsed > self.lease_duration,
            Err(_) => false,
        }
    }

    /// Whether a follower may try to take the lease
    pub fn should_attempt_acquire(&self, record: &LeaseRecord, now: DateTime<Utc>) -> bool {
        record.is_unowned() || self.is_expired(record, now)
    }

    /// Local safety trigger for a leader; independent of the shared record.
    ///
    /// Reached at exactly `renewDeadline` so a leader demotes no later than
    /// the deadline.
    pub fn renewal_deadline_missed(&self, last_successful_renew: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_successful_renew) >= self.renew_deadline
    }

    /// Time left before the renew deadline is reached
    pub fn until_renew_deadline(&self, last_successful_renew: Instant, now: Instant) -> Duration {
        (last_successful_renew + self.renew_deadline).saturating_duration_since(now)
    }

    /// Renew tick while leading: `renewDeadline / renew_attempts`
    pub fn renew_interval(&self) -> Duration {
        self.renew_deadline / self.renew_attempts
    }

    /// Follower poll / failed-operation backoff.
    ///
    /// Flat `retryPeriod` (optionally jittered upward), never longer than
    /// `renewDeadline`.
    pub fn retry_delay(&self) -> Duration {
        let base = if self.jitter_factor > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter_factor);
            Duration::try_from_secs_f64(self.retry_period.as_secs_f64() * (1.0 + extra))
                .unwrap_or(self.renew_deadline)
        } else {
            self.retry_period
        };
        base.min(self.renew_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timing() -> Timing {
        Timing::new(
            Duration::from_secs(15),
            Duration::from_secs(10),
            Duration::from_secs(2),
            2,
            0.0,
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(holder: &str, renewed_at: i64) -> LeaseRecord {
        LeaseRecord {
            holder_identity: holder.to_string(),
            lease_duration_seconds: 15,
            acquire_time: at(0),
            renew_time: at(renewed_at),
            transitions: 1,
        }
    }

    #[test]
    fn test_expiry_is_strictly_after_lease_duration() {
        let t = timing();
        let r = record("node-a", 5);
        assert!(!t.is_expired(&r, at(19)));
        assert!(!t.is_expired(&r, at(20)));
        assert!(t.is_expired(&r, at(21)));
    }

    #[test]
    fn test_future_renew_time_is_not_expired() {
        let t = timing();
        assert!(!t.is_expired(&record("node-a", 100), at(0)));
    }

    #[test]
    fn test_should_attempt_acquire() {
        let t = timing();
        assert!(t.should_attempt_acquire(&record("", 5), at(6)));
        assert!(!t.should_attempt_acquire(&record("node-a", 5), at(6)));
        assert!(t.should_attempt_acquire(&record("node-a", 5), at(21)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_deadline() {
        let t = timing();
        let renewed = Instant::now();
        assert!(!t.renewal_deadline_missed(renewed, renewed + Duration::from_secs(9)));
        assert!(t.renewal_deadline_missed(renewed, renewed + Duration::from_secs(10)));
        assert_eq!(
            t.until_renew_deadline(renewed, renewed + Duration::from_secs(4)),
            Duration::from_secs(6)
        );
        assert_eq!(
            t.until_renew_deadline(renewed, renewed + Duration::from_secs(12)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_intervals() {
        let t = timing();
        assert_eq!(t.renew_interval(), Duration::from_secs(5));
        assert_eq!(t.retry_delay(), Duration::from_secs(2));

        let jittered = Timing::new(
            Duration::from_secs(15),
            Duration::from_secs(10),
            Duration::from_secs(6),
            0,
            5.0,
        );
        // Zero attempts still renews once per deadline
        assert_eq!(jittered.renew_interval(), Duration::from_secs(10));
        for _ in 0..20 {
            let d = jittered.retry_delay();
            assert!(d >= Duration::from_secs(6));
            assert!(d <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_huge_jitter_is_capped_not_fatal() {
        let t = Timing::new(
            Duration::from_secs(15),
            Duration::from_secs(10),
            Duration::from_secs(2),
            2,
            1e30,
        );
        for _ in 0..20 {
            assert!(t.retry_delay() <= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::starting_at(at(0));
        assert_eq!(clock.now(), at(0));
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(clock.now(), at(7));
    }
}
