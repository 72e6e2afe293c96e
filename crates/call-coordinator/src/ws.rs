//! Websocket transport adapter.
//!
//! `GET /rooms/{room}` upgrades to a websocket carrying one JSON frame
//! per signaling message: inbound frames decode to client actions,
//! outbound events encode to text frames. Undecodable frames are
//! logged and dropped - stale clients must not tear the room down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use call_protocol::{codec, ServerEvent};

use crate::directory::RoomDirectory;
use crate::room::RoomHandle;

/// Outbound event buffer per connection.
const EVENT_CHANNEL_BUFFER: usize = 64;

/// Build the coordinator router.
pub fn router(directory: Arc<RoomDirectory>) -> Router {
    Router::new()
        .route("/rooms/:room", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(directory)
}

async fn ws_handler(
    Path(room): Path<String>,
    State(directory): State<Arc<RoomDirectory>>,
    ws: WebSocketUpgrade,
) -> Response {
    let handle = directory.room(&room);
    ws.on_upgrade(move |socket| handle_socket(socket, handle))
}

/// Bridge one websocket to its room actor.
async fn handle_socket(socket: WebSocket, room: RoomHandle) {
    let connection_id = Uuid::new_v4();
    info!(
        target: "call.ws",
        room_id = %room.room_id(),
        connection_id = %connection_id,
        "Websocket connected"
    );

    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(EVENT_CHANNEL_BUFFER);
    if room.connect(connection_id, event_tx).await.is_err() {
        warn!(
            target: "call.ws",
            room_id = %room.room_id(),
            "Room rejected connection (shutting down)"
        );
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: room events out to the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let frame = match codec::encode_event(&event) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(target: "call.ws", error = %error, "Failed to encode event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Reader: socket frames in to the room.
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(frame)) => match codec::decode_action(&frame) {
                Ok(action) => {
                    if room.action(connection_id, action).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    // Unrecognized or malformed frame: log and ignore.
                    warn!(
                        target: "call.ws",
                        connection_id = %connection_id,
                        error = %error,
                        "Dropping undecodable frame"
                    );
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {
                // Binary/ping/pong frames carry no signaling.
                debug!(target: "call.ws", "Ignoring non-text frame");
            }
        }
    }

    let _ = room.disconnect(connection_id).await;
    writer.abort();
    info!(
        target: "call.ws",
        room_id = %room.room_id(),
        connection_id = %connection_id,
        "Websocket closed"
    );
}
