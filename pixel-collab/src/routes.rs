//! HTTP handlers and routing.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::broadcast::ChannelInfo;

use crate::protocol::{
    StorePixelsRequest, FETCH_FAILED, FETCH_PIXELS_PATH, HEALTH_PATH, REALTIME_PATH, STORED_OK,
    STORE_FAILED, STORE_PIXELS_PATH,
};
use crate::server::{ServerStats, SyncError, SyncServer};

pub fn router(server: SyncServer) -> Router {
    let max_body = server.config().max_body_bytes;
    Router::new()
        .route(FETCH_PIXELS_PATH, get(fetch_pixels))
        .route(STORE_PIXELS_PATH, post(store_pixels))
        .route(HEALTH_PATH, get(health))
        .route("/", get(realtime))
        .route(REALTIME_PATH, get(realtime))
        .with_state(server)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(CorsLayer::permissive())
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        match self {
            SyncError::Retrieval(_) => (StatusCode::INTERNAL_SERVER_ERROR, FETCH_FAILED).into_response(),
            SyncError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, STORE_FAILED).into_response(),
            SyncError::MalformedEdit(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            SyncError::Throttled(wait) => {
                let secs = wait.as_secs().max(1);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    format!("Wait {secs} seconds before editing again"),
                )
                    .into_response()
            }
        }
    }
}

async fn fetch_pixels(State(server): State<SyncServer>) -> Response {
    match server.get_grid_json().await {
        Ok(json) => (
            [(header::CONTENT_TYPE, "application/json")],
            json.as_str().to_owned(),
        )
            .into_response(),
        Err(e) => {
            log::error!("Error fetching pixels: {e}");
            e.into_response()
        }
    }
}

async fn store_pixels(
    State(server): State<SyncServer>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<StorePixelsRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let status = rejection.status();
            log::warn!("Rejected edit from {addr}: {}", rejection.body_text());
            // Oversized bodies keep their 413; everything else is a malformed edit
            let status = if status == StatusCode::PAYLOAD_TOO_LARGE {
                status
            } else {
                StatusCode::BAD_REQUEST
            };
            return (status, rejection.body_text()).into_response();
        }
    };

    // Run the edit on its own task so a client hanging up mid-request
    // cannot stop a persist halfway through.
    let task = tokio::spawn(async move { server.apply_edit_from(addr, request.pixels).await });
    match task.await {
        Ok(Ok(_receipt)) => (StatusCode::OK, STORED_OK).into_response(),
        Ok(Err(e)) => {
            if !matches!(e, SyncError::Persistence(_)) {
                log::warn!("Rejected edit from {addr}: {e}");
            }
            e.into_response()
        }
        Err(e) => {
            log::error!("Edit task failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, STORE_FAILED).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    #[serde(flatten)]
    stats: ServerStats,
    channels: Vec<ChannelReport>,
}

#[derive(Debug, Serialize)]
struct ChannelReport {
    id: Uuid,
    remote_addr: Option<String>,
    connected_secs: u64,
}

impl ChannelReport {
    fn new(info: &ChannelInfo, now: Instant) -> Self {
        Self {
            id: info.channel_id,
            remote_addr: info.remote_addr.map(|a| a.to_string()),
            connected_secs: now.saturating_duration_since(info.connected_at).as_secs(),
        }
    }
}

async fn health(State(server): State<SyncServer>) -> impl IntoResponse {
    let now = Instant::now();
    let channels = server.channels().await.iter().map(|c| ChannelReport::new(c, now)).collect();
    Json(HealthReport {
        stats: server.stats().await,
        channels,
    })
}

async fn realtime(
    ws: WebSocketUpgrade,
    State(server): State<SyncServer>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| server.handle_channel(socket, addr))
}
