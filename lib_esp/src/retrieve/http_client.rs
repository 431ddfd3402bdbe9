//! # HTTP Retrieval Utilities
//!
//! An asynchronous client wrapper around `reqwest` with exponential backoff
//! retries, used for the ESP REST endpoints and the discovery service.

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Method, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// Per-request timeout for ESP and discovery endpoints.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `Accept` value for JSON endpoints.
pub const ACCEPT_JSON: &str = "application/json";
/// `Accept` value for XML endpoints.
pub const ACCEPT_XML: &str = "application/xml";

/// Status, headers and raw body of a completed request.
#[derive(Debug)]
pub struct ApiResponse {
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
    /// The response body as text.
    pub body: String,
}

impl ApiResponse {
    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Options for building an `ApiClient`.
#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    /// Accept any server certificate.
    pub tls_skip_verify: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries for transient failures.
    pub max_retries: u32,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            tls_skip_verify: false,
            timeout: REQUEST_TIMEOUT,
            max_retries: 3,
        }
    }
}

/// A middleware-enabled HTTP client bound to a base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: String,
}

impl ApiClient {
    /// Creates a client for `base_url` with a retry policy.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL or the TLS backend cannot
    /// be initialised.
    pub fn new(base_url: &str, options: &ApiClientOptions) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)?;

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.tls_skip_verify)
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// The base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of an endpoint; `path` is appended verbatim.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Performs a `GET` and captures the response without interpreting the status.
    ///
    /// # Errors
    /// Returns an error when the request cannot be sent or the body cannot be read.
    pub async fn get(&self, path: &str, accept: &str, authorization: Option<&str>) -> anyhow::Result<ApiResponse> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_str(accept)?);
        if let Some(value) = authorization {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value)?);
        }
        self.request(Method::GET, path, headers).await
    }

    /// Performs a request with the given headers.
    ///
    /// # Errors
    /// Returns an error when the request cannot be sent or the body cannot be read.
    pub async fn request(&self, method: Method, path: &str, headers: HeaderMap) -> anyhow::Result<ApiResponse> {
        let full_url = self.endpoint(path);
        log::debug!("{} {}", method, full_url);

        let response: reqwest::Response = self.inner.request(method, &full_url).headers(headers).send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let body = response.text().await?;

        Ok(ApiResponse {
            status: status.as_u16(),
            success: status.is_success(),
            headers: resp_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_path_to_trimmed_base() {
        let client = ApiClient::new("http://esp.example:9900/", &ApiClientOptions::default()).unwrap();
        assert_eq!(client.base_url(), "http://esp.example:9900");
        assert_eq!(client.endpoint("/runningProjects"), "http://esp.example:9900/runningProjects");

        let nested = ApiClient::new("https://host/SASESP", &ApiClientOptions::default()).unwrap();
        assert_eq!(nested.endpoint("/apiMeta"), "https://host/SASESP/apiMeta");
    }

    #[test]
    fn relative_base_is_rejected() {
        assert!(ApiClient::new("not a url", &ApiClientOptions::default()).is_err());
    }

    #[test]
    fn json_body_is_decoded() {
        let response = ApiResponse {
            status: 200,
            success: true,
            headers: HeaderMap::new(),
            body: r#"{"a": 1}"#.to_string(),
        };
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["a"], 1);
    }
}
