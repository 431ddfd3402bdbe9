//! # Data Retrieval Module
//!
//! HTTP access to the ESP REST API and the discovery service, with request
//! timeouts and retries with exponential backoff handled in one place.

/// HTTP API client with retry middleware.
pub mod http_client;

pub use http_client::{ApiClient, ApiClientOptions, ApiResponse};
