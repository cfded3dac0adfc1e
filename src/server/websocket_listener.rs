use super::{Connection, ConnectionId, HubHandle, Outbound};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::model::RelayError;

/// A peer that does not take a frame within this long is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Query string of the hub handshake (`?key=<token>`, `token` also accepted).
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    #[serde(alias = "token")]
    pub key: Option<String>,
}

/// Check the token before upgrading; a mismatch is answered with 401 and no
/// session is created.
#[instrument(skip(ws, params, hub))]
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(hub): State<HubHandle>,
) -> Response {
    match hub.authorize(params.key.clone()).await {
        Ok(true) => {
            debug!("Handshake accepted, upgrading");
            ws.on_upgrade(move |socket| listen(socket, hub, params.key))
        }
        Ok(false) => RelayError::Unauthorized.into_response(),
        Err(e) => {
            error!(error = ?e, "Hub session unavailable");
            e.into_response()
        }
    }
}

#[instrument(skip(socket, hub, token))]
async fn listen(socket: WebSocket, hub: HubHandle, token: Option<String>) {
    let (ws_sender, ws_receiver) = socket.split();
    let (connection, rx) = Connection::channel();
    let id = connection.id;

    let mut send_task = tokio::spawn(handle_outgoing_messages(rx, ws_sender));

    // Authorization is checked again here: a rotation may have happened
    // between the handshake and the upgrade.
    if let Err(e) = hub.join(token, connection).await {
        warn!(connection_id = ?id, error = ?e, "Join refused");
        let _ = send_task.await;
        return;
    }

    let mut recv_task = tokio::spawn(handle_incoming_messages(ws_receiver, hub.clone(), id));

    tokio::select! {
        _ = &mut send_task => {
            info!(connection_id = ?id, "Sender task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            info!(connection_id = ?id, "Receiver task completed");
            send_task.abort();
        }
    }

    if let Err(e) = hub.leave(id) {
        error!(error = ?e, "Failed to disconnect");
    }
}

/// Drain `rx` into the socket until a close frame is written or the queue ends.
#[instrument(skip(rx, ws_sender))]
pub async fn handle_outgoing_messages(
    mut rx: Receiver<Outbound>,
    mut ws_sender: SplitSink<WebSocket, Message>,
) {
    debug!("Started handling outgoing messages");
    while let Some(outbound) = rx.recv().await {
        let (message, last) = match outbound {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Binary(data) => (Message::Binary(data), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };
        match timeout(SEND_TIMEOUT, ws_sender.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = ?e, "Failed to send message");
                break;
            }
            Err(_) => {
                warn!("Peer stopped reading, dropping connection");
                break;
            }
        }
        if last {
            break;
        }
    }
}

#[instrument(skip(receiver, hub))]
async fn handle_incoming_messages(
    mut receiver: SplitStream<WebSocket>,
    hub: HubHandle,
    id: ConnectionId,
) {
    debug!("Started handling incoming messages");
    while let Some(message) = receiver.next().await {
        let forwarded = match message {
            Ok(Message::Text(text)) => hub.relay_text(id, text),
            Ok(Message::Binary(data)) => hub.relay_binary(id, data),
            Ok(Message::Close(_)) => {
                info!(connection_id = ?id, "Node closed the connection");
                break;
            }
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = ?e, "Failed to receive message");
                break;
            }
        };
        if let Err(e) = forwarded {
            error!(error = ?e, "Hub session unavailable");
            break;
        }
    }
}
