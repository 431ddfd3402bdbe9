//! # Datasource
//!
//! Request handlers of one configured ESP datasource: panel queries, health
//! check, live stream lifecycle and the `servers` resource used by the query
//! editor.
//!
//! A query is answered with an empty frame addressed to a live channel
//! (`ds/<uid>/stream/<hash>`); the stream itself runs in `run_stream`, which
//! owns one ESP WebSocket connection and pushes frames through a `FrameSender`
//! until cancelled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::discovery::{self, DiscoveryError, ServerInfo};
use super::health::{self, HealthCheckResult};
use super::query::Query;
use super::server::EspServer;
use super::settings::{DatasourceSettings, QueryModel};
use super::sync_map::SyncMap;
use crate::esp::{ClientEvent, EspClientError, EspConnection, EspWsClient, SubscriptionRequest};
use crate::frames::factory::{channel_frame, error_clear_frame, error_frame, window_event_frame};
use crate::frames::Frame;
use crate::retrieve::http_client::{ApiClient, ApiClientOptions};

/// Scope prefix of datasource live channels.
pub const CHANNEL_SCOPE: &str = "ds";
/// Resource path listing ESP servers.
pub const SERVERS_RESOURCE: &str = "servers";

/// Datasource failures.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The datasource settings cannot be used.
    #[error("invalid datasource settings: {0}")]
    Settings(String),

    /// The ESP connection failed.
    #[error(transparent)]
    Client(#[from] EspClientError),

    /// Nobody is receiving frames any more.
    #[error("frame receiver closed")]
    SenderClosed,
}

/// Destination of streamed frames.
pub trait FrameSender: Send + Sync {
    /// Delivers one frame.
    fn send_frame(&self, frame: Frame) -> Result<(), PluginError>;
}

impl FrameSender for mpsc::UnboundedSender<Frame> {
    fn send_frame(&self, frame: Frame) -> Result<(), PluginError> {
        self.send(frame).map_err(|_| PluginError::SenderClosed)
    }
}

/// One query of a query request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    /// Id of the query within the request.
    pub ref_id: String,
    /// The query model; decoded per query so one bad query does not fail the rest.
    #[serde(flatten)]
    pub model: serde_json::Value,
}

/// A batch of panel queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDataRequest {
    /// Queries keyed by `ref_id` in the response.
    pub queries: Vec<DataQuery>,
    /// `Authorization` header of the viewer's request.
    #[serde(skip)]
    pub authorization: Option<String>,
}

/// Result of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataResponse {
    /// Frames answering the query.
    pub frames: Vec<Frame>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    fn failed(message: &str, cause: &dyn std::fmt::Display) -> Self {
        log::error!("{}: {}", message, cause);
        Self {
            frames: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

/// Results of a query request, keyed by `ref_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDataResponse {
    /// Per-query results.
    pub responses: BTreeMap<String, DataResponse>,
}

/// Answer to a stream subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Allowed.
    Ok,
    /// Refused.
    PermissionDenied,
}

/// Answer to a resource call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    /// HTTP status.
    pub status: u16,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl ResourceResponse {
    fn error(status: u16, message: String) -> Self {
        Self {
            status,
            body: Some(serde_json::json!({ "error": message })),
        }
    }
}

enum StreamStep {
    Cancelled,
    Event(Result<ClientEvent, EspClientError>),
}

/// A configured ESP datasource.
#[derive(Debug)]
pub struct Datasource {
    settings: DatasourceSettings,
    client: ApiClient,
    channel_queries: SyncMap<String, Query>,
    server_trust: SyncMap<String, bool>,
}

impl Datasource {
    /// Creates the datasource with default HTTP client options.
    pub fn new(settings: DatasourceSettings) -> Result<Self, PluginError> {
        let options = ApiClientOptions {
            tls_skip_verify: settings.json_data.tls_skip_verify,
            ..ApiClientOptions::default()
        };
        Self::with_client_options(settings, &options)
    }

    /// Creates the datasource with explicit HTTP client options.
    pub fn with_client_options(settings: DatasourceSettings, options: &ApiClientOptions) -> Result<Self, PluginError> {
        let client = ApiClient::new(&settings.url, options).map_err(|e| PluginError::Settings(e.to_string()))?;
        log::debug!(
            "created data source {} for {} with options {:?}",
            settings.uid,
            settings.url,
            settings.json_data
        );

        Ok(Self {
            settings,
            client,
            channel_queries: SyncMap::new(),
            server_trust: SyncMap::new(),
        })
    }

    /// The instance settings.
    pub fn settings(&self) -> &DatasourceSettings {
        &self.settings
    }

    /// Full live channel address of a channel path.
    pub fn channel(&self, path: &str) -> String {
        format!("{}/{}/{}", CHANNEL_SCOPE, self.settings.uid, path)
    }

    /// The query stored under a channel path.
    pub fn channel_query(&self, path: &str) -> Option<Query> {
        self.channel_queries.get(&path.to_string()).ok()
    }

    fn forwarded_authorization<'a>(&self, authorization: Option<&'a str>) -> Option<&'a str> {
        if self.settings.json_data.oauth_pass_thru {
            authorization.filter(|value| !value.is_empty())
        } else {
            None
        }
    }

    /// Answers each query with a frame pointing at its live channel.
    pub async fn query_data(&self, request: &QueryDataRequest) -> QueryDataResponse {
        let authorization = self.forwarded_authorization(request.authorization.as_deref());
        let mut response = QueryDataResponse::default();

        for query in &request.queries {
            let model: QueryModel = match serde_json::from_value(query.model.clone()) {
                Ok(model) => model,
                Err(e) => {
                    response
                        .responses
                        .insert(query.ref_id.clone(), DataResponse::failed("invalid query", &e));
                    continue;
                }
            };

            let server_url = model.server_url(self.settings.json_data.use_external_esp_url);
            let mut forwarded = None;
            if let Some(value) = authorization {
                if self.is_server_url_trusted(server_url, value).await {
                    forwarded = Some(value.to_string());
                }
            }

            response.responses.insert(query.ref_id.clone(), self.query(&model, forwarded));
        }

        response
    }

    fn query(&self, model: &QueryModel, authorization: Option<String>) -> DataResponse {
        let server_url = model.server_url(self.settings.json_data.use_external_esp_url);
        let server = match EspServer::from_url_string(server_url) {
            Ok(server) => server,
            Err(e) => return DataResponse::failed("invalid server URL", &e),
        };

        let query = Query {
            server,
            project: model.project_name.clone(),
            cq: model.cq_name.clone(),
            window: model.window_name.clone(),
            fields: model.fields.clone(),
            interval: model.interval,
            max_events: model.max_data_points,
            authorization,
        };

        let path = query.channel_path();
        log::debug!("Received query for path {}: {:?}", path, query);
        self.channel_queries.set(path.clone(), query);

        DataResponse {
            frames: vec![channel_frame(self.channel(&path))],
            error: None,
        }
    }

    async fn is_server_url_trusted(&self, url: &str, authorization: &str) -> bool {
        if self.settings.json_data.direct_to_esp {
            return true;
        }

        if let Ok(trusted) = self.server_trust.get(&url.to_string()) {
            return trusted;
        }

        match discovery::fetch_from_discovery(&self.client, Some(authorization)).await {
            Ok(servers) => self.update_server_trust(&servers),
            Err(e) => {
                log::error!("Unable to fetch trusted status of server URL {}: {}", url, e);
                return false;
            }
        }

        match self.server_trust.get(&url.to_string()) {
            Ok(trusted) => trusted,
            Err(e) => {
                log::error!("Unable to determine trusted status of server URL {}: {}", url, e);
                false
            }
        }
    }

    fn update_server_trust(&self, servers: &[ServerInfo]) {
        for server in servers {
            self.server_trust.set(server.url.clone(), server.trusted);
            self.server_trust.set(server.external_url.clone(), server.trusted);
        }
    }

    /// Tests connectivity to the configured URL.
    pub async fn check_health(&self, authorization: Option<&str>) -> HealthCheckResult {
        let authorization = self.forwarded_authorization(authorization);
        health::check(&self.client, self.settings.json_data.direct_to_esp, authorization).await
    }

    /// Allows subscribing only to channels of stored queries.
    pub fn subscribe_stream(&self, path: &str) -> StreamStatus {
        log::debug!("Received stream subscription for {}", path);
        if self.channel_queries.get(&path.to_string()).is_ok() {
            StreamStatus::Ok
        } else {
            StreamStatus::PermissionDenied
        }
    }

    /// Publishing to a channel is never allowed.
    pub fn publish_stream(&self, path: &str) -> StreamStatus {
        log::debug!("Refused publish to {}", path);
        StreamStatus::PermissionDenied
    }

    /// Streams the query stored under `path` until `cancel` fires or the ESP
    /// connection fails.
    ///
    /// Unknown paths return `Ok` so the caller does not keep retrying.
    pub async fn run_stream(
        &self,
        path: &str,
        sender: &impl FrameSender,
        cancel: CancellationToken,
    ) -> Result<(), PluginError> {
        log::debug!("initiating stream {}", path);

        let query = match self.channel_queries.get(&path.to_string()) {
            Ok(query) => query,
            Err(e) => {
                log::error!("query not found for channel {}: {}", path, e);
                return Ok(());
            }
        };

        log::debug!("Instantiating new ESP websocket client from query {:?}", query);
        let client = EspWsClient::new(query.server.url().clone(), query.authorization.clone());

        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = client.connect() => Some(result),
        };
        let mut connection = match connected {
            None => {
                self.finish_stream(path);
                return Ok(());
            }
            Some(Ok(connection)) => connection,
            Some(Err(e)) => return Err(self.fail_stream(e, sender)),
        };

        let subscription = query.subscription();
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => StreamStep::Cancelled,
                event = connection.next_event() => StreamStep::Event(event),
            };

            match step {
                StreamStep::Cancelled => {
                    connection.close().await;
                    self.finish_stream(path);
                    return Ok(());
                }
                StreamStep::Event(Ok(ClientEvent::Connected)) => {
                    subscribe_to_query(&mut connection, &subscription, sender, path).await;
                }
                StreamStep::Event(Ok(ClientEvent::ProjectLoaded(name))) if name == query.project => {
                    subscribe_to_query(&mut connection, &subscription, sender, path).await;
                }
                StreamStep::Event(Ok(ClientEvent::ProjectRemoved(name))) if name == query.project => {
                    send_frame(sender, error_frame(&format!("Project '{}' is not running", name)));
                }
                StreamStep::Event(Ok(ClientEvent::Window(event))) => {
                    send_frame(sender, window_event_frame(&event));
                }
                StreamStep::Event(Ok(_)) => {}
                StreamStep::Event(Err(e)) => {
                    connection.close().await;
                    return Err(self.fail_stream(e, sender));
                }
            }
        }
    }

    fn finish_stream(&self, path: &str) {
        log::debug!("Stream cancelled, finish streaming {}", path);
        self.channel_queries.delete(&path.to_string());
    }

    fn fail_stream(&self, err: EspClientError, sender: &impl FrameSender) -> PluginError {
        let message = err.to_string();
        log::error!("{}", message);
        send_frame(sender, error_frame(&message));
        PluginError::Client(err)
    }

    /// Lists ESP servers: from the ESP server itself when `DirectToEsp`,
    /// otherwise from the discovery service (refreshing URL trust).
    pub async fn fetch_server_info(&self, authorization: Option<&str>) -> Result<Vec<ServerInfo>, DiscoveryError> {
        if self.settings.json_data.direct_to_esp {
            let server = discovery::fetch_from_esp_server(&self.client, authorization).await?;
            return Ok(vec![server]);
        }

        let servers = discovery::fetch_from_discovery(&self.client, authorization).await?;
        self.update_server_trust(&servers);
        Ok(servers)
    }

    /// Serves resource calls of the query editor.
    pub async fn call_resource(&self, path: &str, authorization: Option<&str>) -> ResourceResponse {
        if path != SERVERS_RESOURCE {
            return ResourceResponse { status: 404, body: None };
        }

        let authorization = self.forwarded_authorization(authorization);
        let servers = match self.fetch_server_info(authorization).await {
            Ok(servers) => servers,
            Err(e) => {
                log::error!("{}", e);
                return ResourceResponse::error(502, format!("Unable to fetch ESP server information: {}", e));
            }
        };

        match serde_json::to_value(&servers) {
            Ok(data) => ResourceResponse {
                status: 200,
                body: Some(serde_json::json!({ "data": data })),
            },
            Err(e) => {
                log::error!("Unable to serialize ESP server information: {}", e);
                ResourceResponse::error(500, "Unable to serialize ESP server information.".to_string())
            }
        }
    }

    /// Drops stored channel queries and URL trust.
    pub fn dispose(&self) {
        log::debug!("disposing data source {}", self.settings.uid);
        self.channel_queries.clear();
        self.server_trust.clear();
    }
}

async fn subscribe_to_query(
    connection: &mut EspConnection,
    subscription: &SubscriptionRequest,
    sender: &impl FrameSender,
    path: &str,
) {
    send_frame(sender, error_clear_frame());

    if let Err(e) = connection.subscribe(subscription).await {
        log::error!("error while subscribing to events on channel {}: {}", path, e);
    }
}

fn send_frame(sender: &impl FrameSender, frame: Frame) {
    let name = frame.name.clone();
    if let Err(e) = sender.send_frame(frame) {
        log::error!("Error sending {} frame: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::settings::DatasourceJsonData;

    fn settings(json_data: DatasourceJsonData) -> DatasourceSettings {
        DatasourceSettings {
            uid: "esp-uid".to_string(),
            url: "http://127.0.0.1:9".to_string(),
            json_data,
        }
    }

    fn no_retry() -> ApiClientOptions {
        ApiClientOptions {
            max_retries: 0,
            ..ApiClientOptions::default()
        }
    }

    fn request(model: serde_json::Value, authorization: Option<&str>) -> QueryDataRequest {
        QueryDataRequest {
            queries: vec![DataQuery {
                ref_id: "A".to_string(),
                model,
            }],
            authorization: authorization.map(str::to_string),
        }
    }

    fn model() -> serde_json::Value {
        serde_json::json!({
            "externalServerUrl": "wss://external:443",
            "internalServerUrl": "ws://internal:31415",
            "projectName": "p",
            "cqName": "cq",
            "windowName": "w",
            "intervalMs": 100,
            "maxDataPoints": 50
        })
    }

    fn channel_of(response: &QueryDataResponse) -> String {
        let frame = &response.responses["A"].frames[0];
        frame.meta.as_ref().and_then(|m| m.channel.clone()).unwrap()
    }

    #[tokio::test]
    async fn query_returns_channel_frame_and_stores_query() {
        let ds = Datasource::with_client_options(settings(DatasourceJsonData::default()), &no_retry()).unwrap();
        let response = ds.query_data(&request(model(), None)).await;

        let channel = channel_of(&response);
        assert!(channel.starts_with("ds/esp-uid/stream/"), "{}", channel);

        let path = channel.trim_start_matches("ds/esp-uid/");
        let stored = ds.channel_query(path).unwrap();
        assert_eq!(stored.server.url().as_str(), "ws://internal:31415/eventStreamProcessing/v2/connect");
        assert_eq!(stored.interval, 100);
        assert_eq!(stored.max_events, 50);
        assert_eq!(ds.subscribe_stream(path), StreamStatus::Ok);
        assert_eq!(ds.subscribe_stream("stream/unknown"), StreamStatus::PermissionDenied);
        assert_eq!(ds.publish_stream(path), StreamStatus::PermissionDenied);
    }

    #[tokio::test]
    async fn external_url_is_selected_by_option() {
        let json_data = DatasourceJsonData {
            use_external_esp_url: true,
            ..DatasourceJsonData::default()
        };
        let ds = Datasource::with_client_options(settings(json_data), &no_retry()).unwrap();
        let response = ds.query_data(&request(model(), None)).await;
        let channel = channel_of(&response);
        let stored = ds.channel_query(channel.trim_start_matches("ds/esp-uid/")).unwrap();
        assert_eq!(stored.server.url().as_str(), "wss://external/eventStreamProcessing/v2/connect");
    }

    #[tokio::test]
    async fn invalid_queries_fail_individually() {
        let ds = Datasource::with_client_options(settings(DatasourceJsonData::default()), &no_retry()).unwrap();
        let mut req = request(serde_json::json!({"projectName": 5}), None);
        req.queries.push(DataQuery {
            ref_id: "B".to_string(),
            model: serde_json::json!({"internalServerUrl": "not a url"}),
        });

        let response = ds.query_data(&req).await;
        assert_eq!(response.responses["A"].error.as_deref(), Some("invalid query"));
        assert_eq!(response.responses["B"].error.as_deref(), Some("invalid server URL"));
    }

    #[tokio::test]
    async fn authorization_forwarded_only_when_trusted() {
        let direct = DatasourceJsonData {
            oauth_pass_thru: true,
            direct_to_esp: true,
            ..DatasourceJsonData::default()
        };
        let ds = Datasource::with_client_options(settings(direct), &no_retry()).unwrap();
        let response = ds.query_data(&request(model(), Some("Bearer t"))).await;
        let path = channel_of(&response).trim_start_matches("ds/esp-uid/").to_string();
        assert_eq!(ds.channel_query(&path).unwrap().authorization.as_deref(), Some("Bearer t"));

        // Discovery is unreachable, so the server is not trusted.
        let via_discovery = DatasourceJsonData {
            oauth_pass_thru: true,
            ..DatasourceJsonData::default()
        };
        let ds = Datasource::with_client_options(settings(via_discovery), &no_retry()).unwrap();
        let response = ds.query_data(&request(model(), Some("Bearer t"))).await;
        let path = channel_of(&response).trim_start_matches("ds/esp-uid/").to_string();
        assert_eq!(ds.channel_query(&path).unwrap().authorization, None);
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let ds = Datasource::with_client_options(settings(DatasourceJsonData::default()), &no_retry()).unwrap();
        let response = ds.call_resource("projects", None).await;
        assert_eq!(response, ResourceResponse { status: 404, body: None });
    }

    #[tokio::test]
    async fn unknown_stream_path_ends_quietly() {
        let ds = Datasource::with_client_options(settings(DatasourceJsonData::default()), &no_retry()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        ds.run_stream("stream/missing", &tx, CancellationToken::new()).await.unwrap();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dispose_forgets_queries() {
        let ds = Datasource::with_client_options(settings(DatasourceJsonData::default()), &no_retry()).unwrap();
        let response = ds.query_data(&request(model(), None)).await;
        let path = channel_of(&response).trim_start_matches("ds/esp-uid/").to_string();
        ds.dispose();
        assert_eq!(ds.subscribe_stream(&path), StreamStatus::PermissionDenied);
    }

    #[test]
    fn closed_receiver_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        drop(rx);
        assert!(matches!(tx.send_frame(error_clear_frame()), Err(PluginError::SenderClosed)));
    }
}
