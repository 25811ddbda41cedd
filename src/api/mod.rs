//! API Module
//!
//! HTTP lease server.

mod http;

pub use http::{ErrorResponse, HealthResponse, LeaseServer, LeaseSummary};
