use super::NodeHandle;
use crate::server::websocket_listener::handle_outgoing_messages;
use crate::server::{Connection, ConnectionId};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tracing::{debug, error, info, instrument};

/// Viewers connect without a token; the node itself holds the hub session.
#[instrument(skip(ws, node))]
pub async fn handle_viewer(ws: WebSocketUpgrade, State(node): State<NodeHandle>) -> Response {
    ws.on_upgrade(move |socket| listen(socket, node))
}

#[instrument(skip(socket, node))]
async fn listen(socket: WebSocket, node: NodeHandle) {
    let (ws_sender, ws_receiver) = socket.split();
    let (viewer, rx) = Connection::channel();
    let id = viewer.id;
    info!(viewer_id = ?id, "Local viewer connected");

    let mut send_task = tokio::spawn(handle_outgoing_messages(rx, ws_sender));
    if let Err(e) = node.viewer_joined(viewer) {
        error!(error = ?e, "Node loop unavailable");
        send_task.abort();
        return;
    }
    let mut recv_task = tokio::spawn(handle_incoming_messages(ws_receiver, node.clone(), id));

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Err(e) = node.viewer_left(id) {
        error!(error = ?e, "Failed to disconnect viewer");
    }
    info!(viewer_id = ?id, "Local viewer disconnected");
}

async fn handle_incoming_messages(
    mut receiver: SplitStream<WebSocket>,
    node: NodeHandle,
    id: ConnectionId,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Err(e) = node.viewer_message(id, text) {
                    error!(error = ?e, "Node loop unavailable");
                    break;
                }
            }
            // Forwarded as text, like any other viewer payload.
            Ok(Message::Binary(data)) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Err(e) = node.viewer_message(id, text) {
                    error!(error = ?e, "Node loop unavailable");
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(other) => debug!(?other, "Ignoring control frame"),
            Err(e) => {
                error!(error = ?e, "Failed to receive message");
                break;
            }
        }
    }
}
