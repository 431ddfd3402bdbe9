//! Datasource connectivity check.

use serde::Serialize;

use super::discovery::RUNNING_PROJECTS_PATH;
use crate::retrieve::http_client::{ApiClient, ACCEPT_JSON, ACCEPT_XML};

/// Discovery service metadata endpoint.
pub const API_META_PATH: &str = "/apiMeta";

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// The datasource answered 200.
    Ok,
    /// Anything else.
    Error,
}

/// Status and user-facing message of a health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    /// Outcome.
    pub status: HealthStatus,
    /// Message shown next to the datasource settings.
    pub message: String,
}

impl HealthCheckResult {
    fn ok(message: &str) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.to_string(),
        }
    }

    /// An error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }
}

/// Checks the ESP server (`/runningProjects`) when `direct_to_esp`, otherwise
/// the discovery service (`/apiMeta`).
pub async fn check(client: &ApiClient, direct_to_esp: bool, authorization: Option<&str>) -> HealthCheckResult {
    let (path, accept) = if direct_to_esp {
        (RUNNING_PROJECTS_PATH, ACCEPT_XML)
    } else {
        (API_META_PATH, ACCEPT_JSON)
    };

    let response = match client.get(path, accept, authorization).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("Failed to connect to datasource: {}", e);
            return HealthCheckResult::error("Failed to connect to datasource");
        }
    };

    log::debug!("Datasource response status: {}", response.status);

    match response.status {
        200 => HealthCheckResult::ok("Connection successful"),
        401 => {
            log::debug!(
                "endpoint authorization failure, authorization header present: {}",
                authorization.is_some()
            );
            HealthCheckResult::error("Connection rejected due to unauthorized credentials")
        }
        status => HealthCheckResult::error(format!(
            "The datasource sent an unexpected HTTP status code: {}",
            status
        )),
    }
}
