//! WebSocket route for downstream subscribers
//!
//! Each connection joins the broadcast hub and gets two tasks: one
//! forwarding hub messages out, one reading subscribe/unsubscribe commands
//! in. Leaving the hub on any exit path is what keeps dead connections out
//! of the fan-out set.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use relay_core::{ClientMessage, ServerMessage};

use crate::AppState;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    debug!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established subscriber connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(100);
    let id = state.hub.join(tx.clone());

    // Task: forward hub messages to this subscriber
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Read and process subscriber commands until the connection closes
    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket error for {}: {}", id, e);
                break;
            }
        };
        match msg {
            Message::Text(text) => handle_command(&state, &tx, &text).await,
            Message::Close(_) => {
                debug!("Received close from {}", id);
                break;
            }
            // Ping/pong are handled by axum; binary frames are ignored
            _ => {}
        }
    }

    state.hub.leave(id);
    send_task.abort();
    info!("WebSocket connection closed: {}", id);
}

/// Handle one command frame from a subscriber
async fn handle_command(state: &AppState, tx: &mpsc::Sender<ServerMessage>, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let _ = tx
                .send(ServerMessage::Error {
                    message: format!("invalid command: {}", e),
                })
                .await;
            return;
        }
    };

    match message {
        ClientMessage::Subscribe {
            channels,
            market_tickers,
        } => {
            // The request is acknowledged either way; upstream failures
            // are retried internally and logged
            if let Err(e) = state
                .hub
                .handle_subscribe_request(channels.clone(), market_tickers.clone())
                .await
            {
                warn!("subscribe request failed: {}", e);
            }
            let _ = tx
                .send(ServerMessage::Subscribed {
                    channels,
                    market_tickers,
                })
                .await;
        }
        ClientMessage::Unsubscribe {
            channels,
            market_tickers,
        } => {
            if let Err(e) = state
                .hub
                .handle_unsubscribe_request(channels.clone(), market_tickers.clone())
                .await
            {
                warn!("unsubscribe request failed: {}", e);
            }
            let _ = tx
                .send(ServerMessage::Unsubscribed {
                    channels,
                    market_tickers,
                })
                .await;
        }
    }
}
