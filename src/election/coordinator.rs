//! Election Coordinator
//!
//! Drives one participant through acquire, hold, renew and release of the
//! shared lease. All store calls are issued sequentially from a single task;
//! the only coordination with other participants is the store's
//! compare-and-swap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::dispatcher::{Dispatcher, LeaderCallbacks};
use super::ElectionConfig;
use crate::error::{Error, Result, StoreError};
use crate::record::{LeaseRecord, VersionedRecord};
use crate::store::{LeaseStore, StoreResult};
use crate::timing::{Clock, SystemClock, Timing};

/// Role of this participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Not leading; polling the lease
    Follower,
    /// Reading or writing the lease to take it
    Acquiring,
    /// Holding the lease and renewing it
    Leader,
    /// Cancelled while leading; handing the lease back
    Releasing,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "FOLLOWER"),
            Role::Acquiring => write!(f, "ACQUIRING"),
            Role::Leader => write!(f, "LEADER"),
            Role::Releasing => write!(f, "RELEASING"),
        }
    }
}

/// Local view of the election; never shared outside the coordinator
#[derive(Debug)]
struct ParticipantState {
    role: Role,
    /// Last record (and token) seen or written by this participant
    observed: Option<VersionedRecord>,
    /// When the last successful acquire/renew write was issued
    last_renew: Option<Instant>,
    /// Consecutive failed store operations
    failed_attempts: u32,
    /// Renewal whose reply was lost, with the instant it was issued; it may
    /// still have been applied by the store
    unconfirmed: Option<(LeaseRecord, Instant)>,
}

/// Lease-based leader elector for one participant
pub struct LeaderElector {
    config: ElectionConfig,
    timing: Timing,
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    state: ParticipantState,
    cancel: CancellationToken,
}

impl LeaderElector {
    /// Create an elector; fails if the configuration is invalid
    pub fn new(
        config: ElectionConfig,
        store: Arc<dyn LeaseStore>,
        callbacks: LeaderCallbacks,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            timing: config.timing(),
            config,
            store,
            clock: Arc::new(SystemClock),
            dispatcher: Dispatcher::new(callbacks),
            state: ParticipantState {
                role: Role::Follower,
                observed: None,
                last_renew: None,
                failed_attempts: 0,
                unconfirmed: None,
            },
            cancel: CancellationToken::new(),
        })
    }

    /// Use `clock` for lease timestamps and expiry decisions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop when `cancel` is cancelled instead of an internal token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops this elector when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the election on a new task
    pub fn spawn(self) -> ElectionHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        ElectionHandle { cancel, task }
    }

    /// Run the election until cancelled
    pub async fn run(mut self) {
        tracing::info!(
            identity = %self.config.identity,
            lease = %self.store.describe(),
            "Starting leader election"
        );

        while !self.cancel.is_cancelled() {
            match self.state.role {
                Role::Leader => self.renew().await,
                _ => self.try_acquire().await,
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.teardown().await;
        tracing::info!(identity = %self.config.identity, "Leader election stopped");
    }

    /// One follower tick: read the lease and take it if eligible
    async fn try_acquire(&mut self) {
        self.state.role = Role::Acquiring;
        let bound = self.config.store_timeout();

        let Some(read) = self.call(bound, self.store.read()).await else {
            return;
        };
        let now = self.clock.now();

        let expected = match read {
            Ok(current) => {
                self.dispatcher.new_leader(&current.record.holder_identity);
                let eligible = current.record.is_held_by(&self.config.identity)
                    || self.timing.should_attempt_acquire(&current.record, now);
                let token = current.token.clone();
                let holder = current.record.holder_identity.clone();
                self.state.observed = Some(current);

                if !eligible {
                    tracing::debug!(
                        identity = %self.config.identity,
                        holder = %holder,
                        "Lease is held by another participant"
                    );
                    self.state.role = Role::Follower;
                    return;
                }
                Some(token)
            }
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!(identity = %self.config.identity, "No lease record, creating it");
                self.state.observed = None;
                None
            }
            Err(e) => {
                self.record_failure("read lease", &e);
                self.state.role = Role::Follower;
                return;
            }
        };

        let record = LeaseRecord::acquired_by(
            self.state.observed.as_ref().map(|current| &current.record),
            &self.config.identity,
            self.timing.lease_duration(),
            now,
        );
        let issued = Instant::now();
        let Some(write) = self
            .call(bound, self.store.create_or_update(&record, expected.as_ref()))
            .await
        else {
            return;
        };

        match write {
            Ok(token) => {
                tracing::info!(
                    identity = %self.config.identity,
                    transitions = record.transitions,
                    "Acquired lease, now leading"
                );
                self.state.observed = Some(VersionedRecord { record, token });
                self.state.last_renew = Some(issued);
                self.state.failed_attempts = 0;
                self.state.role = Role::Leader;
                self.dispatcher.started_leading(&self.cancel);
                self.dispatcher.new_leader(&self.config.identity);
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::info!(
                    identity = %self.config.identity,
                    "Another participant took the lease first"
                );
                self.state.role = Role::Follower;
                if let Some(Ok(current)) = self.call(bound, self.store.read()).await {
                    self.dispatcher.new_leader(&current.record.holder_identity);
                    self.state.observed = Some(current);
                }
            }
            Err(e) => {
                self.record_failure("acquire lease", &e);
                self.state.role = Role::Follower;
            }
        }
    }

    /// One leader tick: demote on a missed deadline, otherwise renew
    async fn renew(&mut self) {
        let now = Instant::now();
        let (Some(last_renew), Some(current)) = (self.state.last_renew, self.state.observed.clone())
        else {
            self.demote("no renewal on record");
            return;
        };

        if self.timing.renewal_deadline_missed(last_renew, now) {
            self.demote("renew deadline exceeded");
            return;
        }

        let record = current.record.renewed(self.timing.lease_duration(), self.clock.now());
        let bound = self
            .config
            .store_timeout()
            .min(self.timing.until_renew_deadline(last_renew, now));
        let Some(write) = self
            .call(bound, self.store.create_or_update(&record, Some(&current.token)))
            .await
        else {
            return;
        };

        match write {
            Ok(token) => {
                tracing::debug!(identity = %self.config.identity, "Renewed lease");
                self.state.observed = Some(VersionedRecord { record, token });
                self.state.last_renew = Some(now);
                self.state.failed_attempts = 0;
                self.state.unconfirmed = None;
            }
            Err(e @ (StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                if matches!(e, StoreError::Conflict { .. })
                    && self.adopt_unconfirmed(last_renew).await
                {
                    return;
                }
                if self.cancel.is_cancelled() {
                    return;
                }
                tracing::error!(
                    identity = %self.config.identity,
                    error = %e,
                    "Lease was changed by someone else while leading"
                );
                self.demote("lease integrity lost");
            }
            Err(e) => {
                self.record_failure("renew lease", &e);
                self.state.unconfirmed = Some((record, now));
                if self.timing.renewal_deadline_missed(last_renew, Instant::now()) {
                    self.demote("renew deadline exceeded");
                }
            }
        }
    }

    /// A renewal that failed locally may have landed anyway, leaving us with
    /// a stale token. Re-read the record and keep leading only if it is
    /// exactly the renewal we wrote.
    async fn adopt_unconfirmed(&mut self, last_renew: Instant) -> bool {
        let Some((written, issued)) = self.state.unconfirmed.take() else {
            return false;
        };
        let bound = self
            .config
            .store_timeout()
            .min(self.timing.until_renew_deadline(last_renew, Instant::now()));

        match self.call(bound, self.store.read()).await {
            Some(Ok(current)) if current.record == written => {
                tracing::warn!(
                    identity = %self.config.identity,
                    "Earlier renewal was applied after its reply was lost, keeping the lease"
                );
                self.state.observed = Some(current);
                self.state.last_renew = Some(issued);
                self.state.failed_attempts = 0;
                true
            }
            _ => false,
        }
    }

    /// Flip to follower and notify. No store call happens first.
    fn demote(&mut self, reason: &str) {
        self.state.role = Role::Follower;
        self.state.last_renew = None;
        self.state.unconfirmed = None;
        tracing::warn!(
            identity = %self.config.identity,
            reason,
            "Stepping down from leadership"
        );
        self.dispatcher.stopped_leading();
    }

    /// Final transition after cancellation.
    ///
    /// Order while leading: cancel the leading token, fire
    /// `on_stopped_leading`, then (with `release_on_cancel`) make the single
    /// release write. Leader work has been told to stop before any other
    /// participant can take the lease.
    async fn teardown(&mut self) {
        if self.state.role == Role::Leader || self.dispatcher.is_leading() {
            self.state.role = Role::Releasing;
            tracing::info!(identity = %self.config.identity, "Cancelled while leading, stepping down");
            self.dispatcher.stopped_leading();

            if self.config.release_on_cancel {
                self.release().await;
            }
        }
        self.state.role = Role::Follower;
        self.dispatcher.close();
    }

    /// Single best-effort write clearing the holder
    async fn release(&mut self) {
        let Some(current) = self.state.observed.take() else {
            return;
        };
        if !current.record.is_held_by(&self.config.identity) {
            return;
        }

        let record = current.record.released(self.clock.now());
        match timeout(
            self.config.store_timeout(),
            self.store.create_or_update(&record, Some(&current.token)),
        )
        .await
        {
            Ok(Ok(_)) => tracing::info!(identity = %self.config.identity, "Released lease"),
            Ok(Err(e)) => tracing::warn!(
                identity = %self.config.identity,
                "Failed to release lease: {}",
                e
            ),
            Err(_) => tracing::warn!(identity = %self.config.identity, "Timed out releasing lease"),
        }
    }

    /// Issue a store call bounded by `bound`; `None` if cancelled first
    async fn call<T, F>(&self, bound: Duration, op: F) -> Option<StoreResult<T>>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = timeout(bound, op) => Some(result.unwrap_or_else(|_| {
                Err(StoreError::Unavailable(format!("store call timed out after {:?}", bound)))
            })),
        }
    }

    fn record_failure(&mut self, operation: &str, error: &StoreError) {
        self.state.failed_attempts += 1;
        tracing::warn!(
            identity = %self.config.identity,
            attempt = self.state.failed_attempts,
            "Failed to {}: {}",
            operation,
            error
        );
    }

    /// Wait before the next tick
    fn next_delay(&self) -> Duration {
        match (self.state.role, self.state.last_renew) {
            (Role::Leader, Some(last_renew)) => {
                let tick = if self.state.failed_attempts > 0 {
                    self.config.retry_period
                } else {
                    self.timing.renew_interval()
                };
                tick.min(self.timing.until_renew_deadline(last_renew, Instant::now()))
            }
            _ => self.timing.retry_delay(),
        }
    }
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("identity", &self.config.identity)
            .field("lease", &self.store.describe())
            .field("role", &self.state.role)
            .finish_non_exhaustive()
    }
}

/// Owned handle to a running election task.
///
/// Dropping the handle does not stop the election; call [`shutdown`] (or
/// cancel and [`join`]) on host shutdown.
///
/// [`shutdown`]: ElectionHandle::shutdown
/// [`join`]: ElectionHandle::join
#[derive(Debug)]
pub struct ElectionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ElectionHandle {
    /// Request the election to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that stops the election when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the election task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the election task to exit
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("election task failed: {}", e)))
    }

    /// Cancel and wait for the election task to exit
    pub async fn shutdown(self) -> Result<()> {
        self.cancel();
        self.join().await
    }
}
