//! Web server module: axum HTTP surface for browser access.
//!
//! - `GET /` - minimal live view page
//! - `GET /video_feed` - MJPEG live preview (`multipart/x-mixed-replace`)
//! - `GET /motion_status` - `{motion, last_motion}`
//! - `GET /api/status` - capture state and counters
//! - `GET /api/recordings` - saved clips, newest first
//! - `GET /api/recordings/{filename}` - one clip's metadata
//! - `GET /recordings/raw/{filename}` - clip download
//! - `GET /api/logs` - motion log lines
//! - `POST /api/capture/start`, `POST /api/capture/stop` - acquire / release the camera

pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::error::{CaptureError, ServiceError};
use crate::recording::RecordingLibrary;
use crate::service::CaptureService;
use crate::stream;

pub use auth::{AccessGate, OpenAccess, TokenGate};

/// Shared state for the web server
struct WebState {
    service: CaptureService,
    library: RecordingLibrary,
    gate: Arc<dyn AccessGate>,
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Vigil</title></head>
<body>
<h1>Vigil</h1>
<img id="feed" alt="live view">
<p>Motion: <span id="motion">-</span> (last: <span id="last">-</span>)</p>
<script>
const q = location.search;
document.getElementById("feed").src = "/video_feed" + q;
setInterval(async () => {
  const r = await fetch("/motion_status" + q);
  if (!r.ok) return;
  const s = await r.json();
  document.getElementById("motion").textContent = s.motion ? "yes" : "no";
  document.getElementById("last").textContent = s.last_motion ?? "never";
}, 1000);
</script>
</body>
</html>
"#;

/// Build the application router
pub fn router(
    service: CaptureService,
    library: RecordingLibrary,
    gate: Arc<dyn AccessGate>,
) -> Router {
    let raw = ServeDir::new(library.root());
    let state = Arc::new(WebState {
        service,
        library,
        gate,
    });

    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/motion_status", get(motion_status))
        .route("/api/status", get(api_status))
        .route("/api/recordings", get(api_recordings))
        .route("/api/recordings/{filename}", get(api_recording))
        .route("/api/logs", get(api_logs))
        .route("/api/capture/start", post(capture_start))
        .route("/api/capture/stop", post(capture_stop))
        .nest_service("/recordings/raw", raw)
        .layer(middleware::from_fn_with_state(state.clone(), require_access))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve `app` on `bind` until `cancel` fires
pub async fn start(app: Router, bind: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind to {}", bind))?;

    info!("Web server listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Web server error")?;

    Ok(())
}

async fn require_access(
    State(state): State<Arc<WebState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.gate.allows(request.headers(), request.uri()) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

fn service_error(e: ServiceError) -> Response {
    let status = match &e {
        ServiceError::Capture(CaptureError::DeviceUnavailable { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!("Capture unavailable: {}", e);
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /video_feed - live preview, opening the camera on first use
async fn video_feed(State(state): State<Arc<WebState>>) -> Response {
    match state.service.subscribe().await {
        Ok(parts) => (
            [
                (header::CONTENT_TYPE, stream::CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(parts),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

/// GET /motion_status
async fn motion_status(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    Json(state.service.status())
}

/// GET /api/status
async fn api_status(State(state): State<Arc<WebState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "capture": state.service.stats(),
        "motion": state.service.status(),
    }))
}

/// GET /api/recordings
async fn api_recordings(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    Json(state.library.list())
}

/// GET /api/recordings/{filename}
async fn api_recording(
    State(state): State<Arc<WebState>>,
    Path(filename): Path<String>,
) -> Response {
    match state.library.get(&filename) {
        Some(info) => Json(info).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "recording not found" })),
        )
            .into_response(),
    }
}

/// GET /api/logs
async fn api_logs(State(state): State<Arc<WebState>>) -> Json<serde_json::Value> {
    let events = state.service.events().clone();
    let lines = tokio::task::spawn_blocking(move || events.read_lines())
        .await
        .unwrap_or_default();
    Json(serde_json::json!({ "lines": lines }))
}

/// POST /api/capture/start
async fn capture_start(State(state): State<Arc<WebState>>) -> Response {
    match state.service.start().await {
        Ok(_) => Json(serde_json::json!({ "running": true })).into_response(),
        Err(e) => service_error(e),
    }
}

/// POST /api/capture/stop
async fn capture_stop(State(state): State<Arc<WebState>>) -> Json<serde_json::Value> {
    let last_run = state.service.stop().await;
    Json(serde_json::json!({ "running": false, "last_run": last_run }))
}
