use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use interview_types::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection;
use crate::state::AppState;

const CHANNEL_CAPACITY: usize = 32;

/// Handles WebSocket upgrade requests for `/ws/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(session_id = %session_id, "WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Pumps frames between the socket and the connection driver.
///
/// The reader forwards text frames, the writer serializes outbound events,
/// and the driver runs in between. When the driver finishes the writer
/// flushes what is queued and closes the socket.
async fn handle_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(CHANNEL_CAPACITY);

    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(session_id = %writer_id, error = %e, "failed to serialize event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!(session_id = %writer_id, "socket closed while sending");
                return;
            }
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(session_id = %writer_id, error = %e, "failed to send close frame");
        }
    });

    let reader_id = session_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    warn!(session_id = %reader_id, len = bytes.len(), "ignoring binary frame");
                }
                Ok(Message::Close(_)) => {
                    info!(session_id = %reader_id, "client closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    info!(session_id = %reader_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    connection::run(state, session_id, inbound_rx, outbound_tx).await;

    reader.abort();
    if let Err(e) = writer.await {
        debug!(error = %e, "writer task ended abnormally");
    }
}
