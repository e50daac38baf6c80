use crate::config::TransportConfig;
use crate::protocol::{Reply, Request};
use crate::worker::Worker;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<Worker>,
    pub transport: TransportConfig,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            transport: TransportConfig::default(),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Number of open WebSocket connections
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.transport.max_message_size)
        .on_upgrade(|socket| handle_socket(socket, state))
}

/// Frames for one reply: the JSON response, then one binary frame per
/// transferable. They are queued together so replies never interleave.
fn reply_frames(reply: Reply) -> Option<Vec<Message>> {
    let json = match serde_json::to_string(&reply.response) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            return None;
        }
    };

    let mut frames = Vec::with_capacity(1 + reply.transferables.len());
    frames.push(Message::Text(json));
    frames.extend(
        reply
            .transferables
            .iter()
            .map(|transferable| Message::Binary(transferable.to_frame())),
    );
    Some(frames)
}

async fn send_reply(tx: &mpsc::Sender<Vec<Message>>, reply: Reply) {
    if let Some(frames) = reply_frames(reply) {
        let _ = tx.send(frames).await;
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    state.connections.fetch_add(1, Ordering::Relaxed);
    metrics::gauge!("dense_label_ws_connections_active").increment(1.0);
    info!("New WebSocket connection: {}", connection_id);

    // Create channel for outgoing replies
    let (tx, mut rx) = mpsc::channel::<Vec<Message>>(32);

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Spawn task to forward outgoing frames to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frames) = rx.recv().await {
            for frame in frames {
                if ws_sender.send(frame).await.is_err() {
                    return;
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match Worker::parse_message(&text) {
                // Applied inline so later requests on this connection see it
                Ok(Some(request @ Request::Init(_))) => {
                    state.worker.handle_request(request).await;
                }
                Ok(Some(request)) => {
                    let worker = state.worker.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = worker.handle_request(request).await {
                            send_reply(&tx, reply).await;
                        }
                    });
                }
                Ok(None) => {}
                Err(reply) => send_reply(&tx, reply).await,
            },
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary message from {}", connection_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pongs are sent by axum automatically
            }
            Ok(Message::Close(_)) => {
                info!("Client {} requested close", connection_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Let in-flight requests finish before the sender goes away
    drop(tx);
    if let Err(e) = send_task.await {
        error!("Send task for {} failed: {}", connection_id, e);
    }

    state.connections.fetch_sub(1, Ordering::Relaxed);
    metrics::gauge!("dense_label_ws_connections_active").decrement(1.0);
    info!("WebSocket connection closed: {}", connection_id);
}
