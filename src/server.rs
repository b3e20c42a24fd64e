//! Web server for the calibration UI and API
//!
//! The server is the display surface of the session: it shows published
//! frames and forwards clicks and key presses to the session thread as
//! commands. It never touches calibration state directly.

use anyhow::Result;
use arc_swap::ArcSwap;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use image::RgbImage;
use parking_lot::RwLock;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::session::{Command, Reply, Request, Snapshot, Surface};

/// Messages kept for the UI log
const MESSAGE_HISTORY: usize = 200;

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Shared application state
pub struct AppState {
    /// Commands for the session thread
    commands: mpsc::Sender<Request>,
    /// Latest canvas frame (JPEG encoded)
    canvas_frame: ArcSwap<Vec<u8>>,
    /// Latest rectified preview (JPEG encoded)
    preview_frame: ArcSwap<Vec<u8>>,
    /// Last published session snapshot
    snapshot: RwLock<Option<Snapshot>>,
    /// Recent messages, oldest first
    messages: RwLock<VecDeque<String>>,
    jpeg_quality: u8,
}

impl AppState {
    pub fn new(commands: mpsc::Sender<Request>, jpeg_quality: u8) -> Self {
        Self {
            commands,
            canvas_frame: ArcSwap::from_pointee(Vec::new()),
            preview_frame: ArcSwap::from_pointee(Vec::new()),
            snapshot: RwLock::new(None),
            messages: RwLock::new(VecDeque::new()),
            jpeg_quality,
        }
    }

    /// Forward a command to the session and wait for its reply
    pub async fn send(&self, command: Command) -> Result<Reply, StatusCode> {
        let (request, reply) = Request::new(command);
        self.commands
            .send(request)
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
        reply.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Get the latest canvas frame
    pub fn get_canvas(&self) -> Arc<Vec<u8>> {
        self.canvas_frame.load_full()
    }

    /// Get the latest preview frame
    pub fn get_preview(&self) -> Arc<Vec<u8>> {
        self.preview_frame.load_full()
    }

    fn encode(&self, frame: &RgbImage) -> Option<Vec<u8>> {
        match encode_jpeg(frame, self.jpeg_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::error!("Failed to encode frame: {}", e);
                None
            }
        }
    }
}

impl Surface for AppState {
    fn show_canvas(&self, frame: &RgbImage) {
        if let Some(jpeg) = self.encode(frame) {
            self.canvas_frame.store(Arc::new(jpeg));
        }
    }

    fn show_preview(&self, frame: &RgbImage) {
        if let Some(jpeg) = self.encode(frame) {
            self.preview_frame.store(Arc::new(jpeg));
        }
    }

    fn publish(&self, reply: &Reply) {
        *self.snapshot.write() = Some(reply.snapshot.clone());

        let mut messages = self.messages.write();
        messages.extend(reply.messages.iter().cloned());
        while messages.len() > MESSAGE_HISTORY {
            messages.pop_front();
        }
    }
}

/// Encode an RGB image to JPEG
fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    use image::ImageOutputFormat;
    use std::io::Cursor;

    let mut jpeg_data = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg_data);
    frame.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))?;

    Ok(jpeg_data)
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Static files and UI
        .route("/", get(index_handler))
        .route("/static/*path", get(static_handler))
        // Session
        .route("/api/state", get(get_state))
        .route("/api/click", post(click))
        .route("/api/key", post(key))
        .route("/api/reset", post(reset))
        .route("/api/preview", get(get_preview).post(preview))
        .route("/api/save", post(save))
        .route("/api/quit", post(quit))
        // Frames
        .route("/api/frame", get(get_frame))
        .route("/api/frame/stream", get(frame_stream))
        // System info
        .route("/api/info", get(get_info))
        .layer(cors)
        .with_state(state)
}

/// Run the web server until `shutdown` resolves
pub async fn run_server(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Serve the main index page
async fn index_handler() -> impl IntoResponse {
    match StaticAssets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Index not found").into_response(),
    }
}

/// Serve static files
async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Snapshot plus the recent message log
#[derive(Serialize)]
struct StateResponse {
    #[serde(flatten)]
    snapshot: Snapshot,
    messages: Vec<String>,
}

/// Get current session state
async fn get_state(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.snapshot.read().clone();
    match snapshot {
        Some(snapshot) => Json(StateResponse {
            snapshot,
            messages: state.messages.read().iter().cloned().collect(),
        })
        .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Session not started").into_response(),
    }
}

/// Turn a session reply into a response
async fn dispatch(state: &AppState, command: Command) -> Response {
    match state.send(command).await {
        Ok(reply) => Json(reply).into_response(),
        Err(status) => (status, "Calibration session has ended").into_response(),
    }
}

#[derive(Deserialize)]
struct ClickRequest {
    x: f64,
    y: f64,
}

/// Add a point at image pixel coordinates
async fn click(State(state): State<Arc<AppState>>, Json(req): Json<ClickRequest>) -> Response {
    dispatch(&state, Command::Click { x: req.x, y: req.y }).await
}

#[derive(Deserialize)]
struct KeyRequest {
    key: String,
}

/// Forward a key press
async fn key(State(state): State<Arc<AppState>>, Json(req): Json<KeyRequest>) -> Response {
    dispatch(&state, Command::from_key(&req.key)).await
}

async fn reset(State(state): State<Arc<AppState>>) -> Response {
    dispatch(&state, Command::Reset).await
}

async fn preview(State(state): State<Arc<AppState>>) -> Response {
    dispatch(&state, Command::Preview).await
}

async fn save(State(state): State<Arc<AppState>>) -> Response {
    dispatch(&state, Command::Save).await
}

async fn quit(State(state): State<Arc<AppState>>) -> Response {
    dispatch(&state, Command::Quit).await
}

fn jpeg_response(frame: Arc<Vec<u8>>) -> Response {
    if frame.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response();
    }

    (
        [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
        frame.as_ref().clone(),
    )
        .into_response()
}

/// Get current canvas frame (JPEG)
async fn get_frame(State(state): State<Arc<AppState>>) -> Response {
    jpeg_response(state.get_canvas())
}

/// Get the last rectified preview (JPEG)
async fn get_preview(State(state): State<Arc<AppState>>) -> Response {
    jpeg_response(state.get_preview())
}

/// MJPEG stream of the canvas
async fn frame_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use axum::body::Body;
    use tokio_stream::StreamExt;

    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_millis(100),
    ))
    .map(move |_| {
        let frame = state.get_canvas();
        if frame.is_empty() {
            return Ok::<_, std::convert::Infallible>(
                "--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_string().into_bytes(),
            );
        }

        let mut response = Vec::new();
        response.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
        response.extend_from_slice(frame.len().to_string().as_bytes());
        response.extend_from_slice(b"\r\n\r\n");
        response.extend_from_slice(&frame);
        response.extend_from_slice(b"\r\n");

        Ok(response)
    });

    let body = Body::from_stream(stream);

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        body,
    )
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let snapshot = state.snapshot.read();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        width: snapshot.as_ref().map(|s| s.width),
        height: snapshot.as_ref().map(|s| s.height),
    })
}
