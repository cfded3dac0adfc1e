use super::{websocket_listener, NodeHandle, NodeStatus};
use crate::model::constants::{preview, TOKEN_PREVIEW_CHARS};
use crate::model::{RelayError, Result};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub message: String,
}

/// Viewer websocket on `/` plus the node's administrative API.
#[instrument(skip(node))]
pub fn create_node_router(node: NodeHandle) -> Router {
    debug!("Creating node routes");
    Router::new()
        .route("/", get(websocket_listener::handle_viewer))
        .route("/ws", get(websocket_listener::handle_viewer))
        .route("/api/status", get(status))
        .route("/api/connect", post(connect))
        .with_state(node)
}

async fn status(State(node): State<NodeHandle>) -> Result<Json<NodeStatus>> {
    Ok(Json(node.status().await?))
}

/// A missing or unreadable body counts as a missing key.
async fn connect(
    State(node): State<NodeHandle>,
    request: Option<Json<ConnectRequest>>,
) -> Result<Json<ConnectResponse>> {
    let key = request
        .and_then(|Json(request)| request.key)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or(RelayError::MissingToken)?;
    info!("Received new session key");

    let message = format!("Connected with key: {}...", preview(&key, TOKEN_PREVIEW_CHARS));
    node.connect(key).await?;
    Ok(Json(ConnectResponse { message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;
    use crate::node::{EdgeNode, EdgeRelay, LocalFanout, ReconnectPolicy};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let relay = EdgeRelay::new(NodeId::new("SERVER_B"), ReconnectPolicy::Manual);
        let (node, _task) =
            NodeHandle::spawn(EdgeNode::new(relay, LocalFanout::new(true), "ws://127.0.0.1:1"));
        create_node_router(node)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status() {
        let response = router()
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "disconnected", "nodeId": "SERVER_B"})
        );
    }

    #[tokio::test]
    async fn test_connect_without_key() {
        let response = router()
            .oneshot(
                Request::post("/api/connect")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"message": "Missing key"}));
    }

    #[tokio::test]
    async fn test_connect_with_unreadable_body() {
        let requests = [
            Request::post("/api/connect").body(Body::from("key=abc")).unwrap(),
            Request::post("/api/connect")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"key\":"))
                .unwrap(),
            Request::post("/api/connect")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"key": 42}"#))
                .unwrap(),
        ];
        for request in requests {
            let response = router().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await, json!({"message": "Missing key"}));
        }
    }
}
