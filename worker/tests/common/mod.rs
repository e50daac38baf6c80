//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use dense_label_worker::config::Config;
use dense_label_worker::server::{AppState, ws_handler};
use dense_label_worker::worker::Worker;
use futures_util::{Stream, StreamExt};
use image::{ImageBuffer, ImageFormat, Luma};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Header the test media server requires on every request
pub const MEDIA_TOKEN_HEADER: &str = "x-media-token";
pub const MEDIA_TOKEN: &str = "secret";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a test application router with state
pub fn create_test_app_with_state() -> (Router, AppState) {
    let worker = Worker::new(&Config::default()).expect("Failed to create worker");
    let app_state = AppState::new(Arc::new(worker));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(app_state.clone());

    (app, app_state)
}

/// Create a test application router with all routes configured
pub fn create_test_app() -> Router {
    create_test_app_with_state().0
}

/// Serve `app` on a random local port
pub async fn serve(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, handle)
}

/// Start the worker's HTTP/WebSocket server on a random port
pub async fn start_test_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    serve(create_test_app()).await
}

type MediaFiles = Arc<HashMap<String, Vec<u8>>>;

async fn media(
    State(files): State<MediaFiles>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let authorized = headers
        .get(MEDIA_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        == Some(MEDIA_TOKEN);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Vec::new());
    }

    match params.get("filepath").and_then(|path| files.get(path)) {
        Some(bytes) => (StatusCode::OK, bytes.clone()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

/// Start a media server answering `{prefix}/media?filepath=` from `files`
pub async fn start_media_server(
    prefix: &str,
    files: HashMap<String, Vec<u8>>,
) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route(&format!("{}/media", prefix), get(media))
        .with_state(Arc::new(files));
    serve(app).await
}

/// Encode 8-bit grayscale pixels as a PNG
pub fn encode_png_gray(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let image: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width, height, pixels.to_vec()).unwrap();
    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, ImageFormat::Png).unwrap();
    encoded.into_inner()
}

/// One reply read off the socket: the JSON response and its binary frames
/// keyed by transferable id
pub struct ReceivedReply {
    pub json: serde_json::Value,
    pub frames: HashMap<Uuid, Vec<u8>>,
}

/// Read the next reply, collecting `expected_frames` binary frames after it
pub async fn next_reply<S>(stream: &mut S, expected_frames: usize) -> ReceivedReply
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        let json = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Connection ended before a reply: {:?}", other),
            }
        };

        let mut frames = HashMap::new();
        while frames.len() < expected_frames {
            match stream.next().await {
                Some(Ok(Message::Binary(bytes))) => {
                    let (id, payload) = bytes.split_at(16);
                    frames.insert(Uuid::from_slice(id).unwrap(), payload.to_vec());
                }
                Some(Ok(_)) => continue,
                other => panic!("Connection ended before all frames: {:?}", other),
            }
        }

        ReceivedReply { json, frames }
    })
    .await
    .expect("Timed out waiting for a reply")
}

/// Initialize test logging for detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dense_label_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
