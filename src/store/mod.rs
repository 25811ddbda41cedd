//! Lease Store Module
//!
//! The lease store contract consumed by the election coordinator, and its
//! backends. Stores perform no retries; all retry policy lives in the
//! coordinator.

mod memory;
mod sqlite;
mod http;

pub use memory::MemoryLeaseStore;
pub use sqlite::{LeaseTable, SqliteLeaseStore};
pub use http::{HttpLeaseStore, LeaseResponse, WriteLeaseRequest, WriteLeaseResponse};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{FencingToken, LeaseRecord, VersionedRecord};

/// Result of a single lease store call
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Access to one named lease record with compare-and-swap writes.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the record and its current fencing token.
    ///
    /// Fails with `NotFound` when no record exists and `Unavailable` on
    /// transient failures.
    async fn read(&self) -> StoreResult<VersionedRecord>;

    /// Write `record` only if the stored token still equals `expected`.
    ///
    /// `None` means "create": it succeeds only when no record exists.
    /// Returns the new token. A mismatch fails with `Conflict` and never
    /// overwrites; an update of a record that no longer exists fails with
    /// `NotFound`.
    async fn create_or_update(
        &self,
        record: &LeaseRecord,
        expected: Option<&FencingToken>,
    ) -> StoreResult<FencingToken>;

    /// Human readable location of the record, for logs
    fn describe(&self) -> String;
}

/// Key of a lease record: `namespace/name`
pub fn lease_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
