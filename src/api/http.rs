//! HTTP Lease Server
//!
//! Serves a SQLite lease table over HTTP so participants on different hosts
//! can share lease records through [`crate::store::HttpLeaseStore`].

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result, StoreError};
use crate::store::{lease_key, LeaseResponse, LeaseTable, WriteLeaseRequest, WriteLeaseResponse};

/// HTTP lease server
pub struct LeaseServer {
    config: ApiConfig,
    table: Arc<LeaseTable>,
}

impl LeaseServer {
    /// Create a new lease server over `table`
    pub fn new(config: ApiConfig, table: Arc<LeaseTable>) -> Self {
        Self { config, table }
    }

    /// Create the router
    pub fn router(table: Arc<LeaseTable>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/leases", get(handle_list))
            .route(
                "/leases/:namespace/:name",
                get(handle_get).put(handle_put),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(table)
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!(
            "Lease server listening on {} (database {})",
            self.config.bind_address,
            self.table.path().display()
        );
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = Self::router(Arc::clone(&self.table));
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;
        Ok(())
    }
}

// ============ Request/Response Types ============

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub database: String,
}

/// One entry of `GET /leases`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSummary {
    pub key: String,
    pub holder_identity: String,
    pub transitions: u64,
    pub renew_time: DateTime<Utc>,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(table): State<Arc<LeaseTable>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        database: table.path().display().to_string(),
    })
}

async fn handle_list(State(table): State<Arc<LeaseTable>>) -> Response {
    match table.list().await {
        Ok(leases) => {
            let summaries: Vec<LeaseSummary> = leases
                .into_iter()
                .map(|(key, current)| LeaseSummary {
                    key,
                    holder_identity: current.record.holder_identity,
                    transitions: current.record.transitions,
                    renew_time: current.record.renew_time,
                    version: current.token.to_string(),
                })
                .collect();
            Json(summaries).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

async fn handle_get(
    State(table): State<Arc<LeaseTable>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match table.get(&lease_key(&namespace, &name)).await {
        Ok(current) => Json(LeaseResponse {
            record: current.record,
            version: current.token,
        })
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn handle_put(
    State(table): State<Arc<LeaseTable>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<WriteLeaseRequest>,
) -> Response {
    let key = lease_key(&namespace, &name);
    match table
        .compare_and_swap(&key, &req.record, req.expected_version.as_ref())
        .await
    {
        Ok(version) => {
            tracing::debug!(
                key = %key,
                holder = %req.record.holder_identity,
                version = %version,
                "Lease written"
            );
            Json(WriteLeaseResponse { version }).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

fn store_error_response(error: StoreError) -> Response {
    let (status, code) = match &error {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        StoreError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
        StoreError::Unavailable(_) => {
            tracing::warn!("Lease table unavailable: {}", error);
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LeaseRecord;
    use crate::store::{HttpLeaseStore, LeaseStore};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn spawn_server(table: Arc<LeaseTable>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = LeaseServer::new(ApiConfig::default(), table);
        tokio::spawn(async move { server.serve(listener).await });
        format!("http://{}", address)
    }

    fn record(holder: &str) -> LeaseRecord {
        LeaseRecord::acquired_by(None, holder, Duration::from_secs(15), Utc::now())
    }

    #[tokio::test]
    async fn test_http_store_against_server() {
        let dir = tempdir().unwrap();
        let table = Arc::new(LeaseTable::open(dir.path().join("leases.db")).unwrap());
        let url = spawn_server(Arc::clone(&table)).await;

        let a = HttpLeaseStore::new(&url, "lease-namespace", "lease-name", Duration::from_secs(2)).unwrap();
        let b = HttpLeaseStore::new(&url, "lease-namespace", "lease-name", Duration::from_secs(2)).unwrap();

        assert!(matches!(a.read().await, Err(StoreError::NotFound { .. })));

        let token = a.create_or_update(&record("node-a"), None).await.unwrap();
        assert!(matches!(
            b.create_or_update(&record("node-b"), None).await,
            Err(StoreError::Conflict { .. })
        ));

        let seen = b.read().await.unwrap();
        assert_eq!(seen.record.holder_identity, "node-a");
        assert_eq!(seen.token, token);

        let renewed = seen.record.renewed(Duration::from_secs(15), Utc::now());
        let next = a.create_or_update(&renewed, Some(&token)).await.unwrap();
        assert_ne!(next, token);

        // Stale token is fenced off
        assert!(matches!(
            b.create_or_update(&record("node-b"), Some(&token)).await,
            Err(StoreError::Conflict { .. })
        ));

        // Same row is visible through the table directly
        let direct = table.get("lease-namespace/lease-name").await.unwrap();
        assert_eq!(direct.token, next);
    }

    #[tokio::test]
    async fn test_list_and_health() {
        let dir = tempdir().unwrap();
        let table = Arc::new(LeaseTable::open(dir.path().join("leases.db")).unwrap());
        let url = spawn_server(Arc::clone(&table)).await;

        HttpLeaseStore::new(&url, "default", "one", Duration::from_secs(2))
            .unwrap()
            .create_or_update(&record("node-a"), None)
            .await
            .unwrap();

        let health: HealthResponse = reqwest::get(format!("{}/health", url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(health.healthy);

        let leases: Vec<LeaseSummary> = reqwest::get(format!("{}/leases", url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].key, "default/one");
        assert_eq!(leases[0].holder_identity, "node-a");
        assert_eq!(leases[0].transitions, 1);
    }
}
