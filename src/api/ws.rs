//! WebSocket fan-out of live events.
//!
//! The tailer's sink feeds a `tokio::sync::broadcast` channel; each
//! WebSocket client holds a receiver and gets every event as a JSON text
//! frame. Delivery is best-effort: a lagging client skips messages, a
//! disconnected one is dropped.

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::routes::AppState;
use crate::error::Result;
use crate::ports::sink::EventSink;
use crate::types::TransferEvent;

/// Capacity of the broadcast channel between the tailer and clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// BROADCAST SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Sink publishing each live event to the broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TransferEvent>,
}

impl BroadcastSink {
    /// Create a sink over an existing channel.
    #[must_use]
    pub const fn new(tx: broadcast::Sender<TransferEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn deliver(&self, event: &TransferEvent) -> Result<()> {
        // send() errs only when no receiver is subscribed, which is a
        // perfectly normal state for a push channel.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBSOCKET HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

/// `GET /ws`: upgrade and stream live events.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let receiver = state.events_tx.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, receiver))
}

async fn stream_events(mut socket: WebSocket, mut receiver: broadcast::Receiver<TransferEvent>) {
    debug!("WebSocket client connected");

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(error = %err, "Failed to serialize event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("WebSocket client disconnected");
}
