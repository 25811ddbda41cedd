//! WolfLease - Lease-Based Leader Election
//!
//! Elects exactly one leader among independent processes that share nothing
//! but a single lease record in a store with compare-and-swap writes.
//!
//! # Architecture
//!
//! Each participant runs a [`election::LeaderElector`]. Followers poll the
//! record and take it over once it expires; the leader renews it on a fixed
//! tick and demotes itself if it cannot renew before its renew deadline.
//! Every write is fenced by the token of the last read, so concurrent
//! writers never overwrite each other.
//!
//! # Features
//!
//! - Role-change callbacks with a cancellation token for leader work
//! - Optional release of the lease on shutdown for fast failover
//! - In-memory, SQLite and HTTP lease stores
//! - HTTP lease server for participants on different hosts

pub mod api;
pub mod config;
pub mod election;
pub mod error;
pub mod record;
pub mod store;
pub mod timing;

pub use config::WolfLeaseConfig;
pub use error::{Error, Result, StoreError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfLeaseConfig;
    pub use crate::election::{ElectionConfig, ElectionHandle, LeaderCallbacks, LeaderElector, Role};
    pub use crate::error::{Error, Result, StoreError};
    pub use crate::record::{FencingToken, LeaseRecord, VersionedRecord};
    pub use crate::store::{LeaseStore, MemoryLeaseStore};
    pub use tokio_util::sync::CancellationToken;
}
