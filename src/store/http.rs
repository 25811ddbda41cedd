//! HTTP lease store client
//!
//! Talks to a `wolflease serve` lease server, letting participants on
//! different hosts share one lease record.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{LeaseStore, StoreResult};
use crate::error::{Error, Result, StoreError};
use crate::record::{FencingToken, LeaseRecord, VersionedRecord};

/// Body of `GET /leases/{namespace}/{name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseResponse {
    pub record: LeaseRecord,
    pub version: FencingToken,
}

/// Body of `PUT /leases/{namespace}/{name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteLeaseRequest {
    pub record: LeaseRecord,
    #[serde(default)]
    pub expected_version: Option<FencingToken>,
}

/// Response to a successful write
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteLeaseResponse {
    pub version: FencingToken,
}

/// Lease store reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpLeaseStore {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl HttpLeaseStore {
    /// Create a client for lease `namespace/name` on the server at `base_url`.
    ///
    /// `request_timeout` bounds every call.
    pub fn new(
        base_url: &str,
        namespace: &str,
        name: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/leases/{}/{}",
                base_url.trim_end_matches('/'),
                namespace,
                name
            ),
            key: super::lease_key(namespace, name),
        })
    }

    fn unexpected(&self, status: StatusCode) -> StoreError {
        StoreError::Unavailable(format!("lease server returned {} for {}", status, self.key))
    }
}

#[async_trait]
impl LeaseStore for HttpLeaseStore {
    async fn read(&self) -> StoreResult<VersionedRecord> {
        let response = self.client.get(&self.url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: LeaseResponse = response.json().await?;
                Ok(VersionedRecord {
                    record: body.record,
                    token: body.version,
                })
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { key: self.key.clone() }),
            status => Err(self.unexpected(status)),
        }
    }

    async fn create_or_update(
        &self,
        record: &LeaseRecord,
        expected: Option<&FencingToken>,
    ) -> StoreResult<FencingToken> {
        let request = WriteLeaseRequest {
            record: record.clone(),
            expected_version: expected.cloned(),
        };
        let response = self.client.put(&self.url).json(&request).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: WriteLeaseResponse = response.json().await?;
                Ok(body.version)
            }
            StatusCode::CONFLICT => Err(StoreError::Conflict { key: self.key.clone() }),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound { key: self.key.clone() }),
            status => Err(self.unexpected(status)),
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
