use crate::registry::Registry;
use crate::room::RoomConnection;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared state for the WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<Registry>,
}

/// WebSocket upgrade handler.
///
/// The room name is the request path: a connection to `/hall-42` joins room
/// `hall-42`.
pub async fn ws_handler(
    State(state): State<WsState>,
    Path(room_name): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_name))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: WsState, room_name: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Get or create the room and register the connection
    let room = state.registry.get_or_create(&room_name).await;
    let mut connection = RoomConnection::new(Arc::clone(&room));

    info!(
        room = %room_name,
        connection = connection.id(),
        members = room.member_count(),
        "connection opened"
    );

    // The first frame a client receives is always the room's full snapshot,
    // so a late joiner never misses prior history.
    let snapshot = room.snapshot();
    if let Err(e) = ws_tx.send(Message::Binary(snapshot.into())).await {
        error!(room = %room_name, "failed to send snapshot: {}", e);
        return;
    }

    // Handle bidirectional communication
    loop {
        tokio::select! {
            // Inbound updates from this client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        room.handle_update(connection.id(), &data);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!(room = %room_name, "failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(room = %room_name, "client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(room = %room_name, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Updates from other members of the same room
            Some(update) = connection.recv_broadcast() => {
                if let Err(e) = ws_tx.send(Message::Binary(update.into())).await {
                    error!(room = %room_name, "failed to forward update: {}", e);
                    break;
                }
            }

            else => break,
        }
    }

    info!(
        room = %room_name,
        connection = connection.id(),
        "connection closed"
    );

    // Dropping the connection removes it from the room's membership
    drop(connection);
    state.registry.maybe_remove_room(&room_name).await;
}
