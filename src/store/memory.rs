//! In-memory lease store
//!
//! A lease slot shared between handles in one process. Each handle has its
//! own availability switch, which lets tests cut a single participant off
//! from the store while others keep using it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{LeaseStore, StoreResult};
use crate::error::StoreError;
use crate::record::{FencingToken, LeaseRecord, VersionedRecord};

/// Shared state behind all handles
#[derive(Debug, Default)]
struct Slot {
    current: Mutex<Option<VersionedRecord>>,
    writes: AtomicU64,
}

/// In-memory lease store handle
#[derive(Debug, Clone)]
pub struct MemoryLeaseStore {
    key: String,
    slot: Arc<Slot>,
    available: Arc<AtomicBool>,
    latency: Duration,
}

impl MemoryLeaseStore {
    /// Create an empty store for `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            slot: Arc::new(Slot::default()),
            available: Arc::new(AtomicBool::new(true)),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency` before it takes effect
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Another handle on the same record, with its own availability switch
    pub fn connect(&self) -> Self {
        Self {
            key: self.key.clone(),
            slot: Arc::clone(&self.slot),
            available: Arc::new(AtomicBool::new(true)),
            latency: self.latency,
        }
    }

    /// Make calls through this handle fail with `Unavailable` (or recover)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful writes across all handles
    pub fn write_count(&self) -> u64 {
        self.slot.writes.load(Ordering::SeqCst)
    }

    /// Current record, bypassing availability
    pub async fn snapshot(&self) -> Option<VersionedRecord> {
        self.slot.current.lock().await.clone()
    }

    /// Delete the record, bypassing availability
    pub async fn remove(&self) -> Option<VersionedRecord> {
        self.slot.current.lock().await.take()
    }

    async fn enter(&self) -> StoreResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} is unreachable", self.key)));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn read(&self) -> StoreResult<VersionedRecord> {
        self.enter().await?;
        self.slot
            .current
            .lock()
            .await
            .clone()
            .ok_or_else(|| StoreError::NotFound { key: self.key.clone() })
    }

    async fn create_or_update(
        &self,
        record: &LeaseRecord,
        expected: Option<&FencingToken>,
    ) -> StoreResult<FencingToken> {
        self.enter().await?;
        let mut current = self.slot.current.lock().await;

        let matches = match (current.as_ref(), expected) {
            (None, None) => true,
            (None, Some(_)) => return Err(StoreError::NotFound { key: self.key.clone() }),
            (Some(stored), Some(token)) => stored.token == *token,
            (Some(_), None) => false,
        };
        if !matches {
            return Err(StoreError::Conflict { key: self.key.clone() });
        }

        let token = FencingToken::new(Uuid::new_v4().to_string());
        *current = Some(VersionedRecord {
            record: record.clone(),
            token: token.clone(),
        });
        self.slot.writes.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.key)
    }
}
