use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use lib_esp::plugin::{HealthStatus, QueryDataRequest, StreamStatus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use crate::esp_logic::config::Config;
use crate::esp_logic::live::LiveChannel;
use crate::esp_logic::state::AppState;

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/health", get(check_health_handler))
        .route("/api/resources/{*path}", get(resource_handler))
        .route("/api/live/{*path}", get(live_handler).post(publish_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        config.bind_address.as_deref().unwrap_or("0.0.0.0"),
        config.port.unwrap_or(9003)
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("ESP bridge listening on {}", addr);

    let app = router(app_state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("ESP bridge shutting down.");
            app_state.shutdown();
        })
        .await?;

    Ok(())
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<QueryDataRequest>,
) -> impl IntoResponse {
    request.authorization = authorization(&headers);
    Json(state.datasource.query_data(&request).await)
}

async fn check_health_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let auth = authorization(&headers);
    let result = state.datasource.check_health(auth.as_deref()).await;
    let status = match result.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(result))
}

async fn resource_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let auth = authorization(&headers);
    let response = state.datasource.call_resource(&path, auth.as_deref()).await;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

async fn publish_handler(State(state): State<AppState>, Path(path): Path<String>) -> impl IntoResponse {
    let status = state.datasource.publish_stream(&path);
    (StatusCode::FORBIDDEN, Json(serde_json::json!({ "status": status })))
}

async fn live_handler(State(state): State<AppState>, Path(path): Path<String>, ws: WebSocketUpgrade) -> Response {
    if state.datasource.subscribe_stream(&path) != StreamStatus::Ok {
        log::warn!("Refused live subscription to {}", path);
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "status": StreamStatus::PermissionDenied })),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, path))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, state: AppState, path: String) {
    let (channel, latest, mut data_rx) = state.join(&path);
    log::info!("Viewer joined {} ({} watching)", path, channel.viewers());

    if let Some(batch) = latest {
        if socket.send(Message::Text(batch.to_string().into())).await.is_err() {
            state.leave(&channel);
            return;
        }
    }

    viewer_loop(&mut socket, &channel, &mut data_rx).await;

    state.leave(&channel);
    log::info!("Viewer left {}", path);
}

async fn viewer_loop(socket: &mut WebSocket, channel: &Arc<LiveChannel>, data_rx: &mut broadcast::Receiver<Arc<String>>) {
    loop {
        tokio::select! {
            biased;

            batch = data_rx.recv() => match batch {
                Ok(batch) => {
                    if socket.send(Message::Text(batch.to_string().into())).await.is_err() {
                        break; // viewer disconnected
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Viewer of {} skipped {} batches", channel.path(), skipped);
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = channel.stopped() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
