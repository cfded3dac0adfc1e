use canvas_relay::model::{NodeId, SessionAuthority, SessionToken, Settings};
use canvas_relay::node::{create_node_router, EdgeNode, EdgeRelay, LocalFanout, NodeHandle, ReconnectPolicy};
use canvas_relay::server::{create_hub_router, serve, HubHandle, HubSession};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing_subscriber::EnvFilter;

pub type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(5);

/// Route logs through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Hub {
    pub addr: SocketAddr,
    pub handle: HubHandle,
}

impl Hub {
    pub async fn start(token: &str) -> Self {
        init_tracing();
        let session = HubSession::new(
            SessionAuthority::with_token(SessionToken::from(token.to_string())),
            Settings::default(),
            None,
        );
        let (handle, _task) = HubHandle::spawn(session);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, create_hub_router(handle.clone())));
        Hub { addr, handle }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait until the hub has registered exactly `count` connections.
    pub async fn wait_for_connections(&self, count: usize) {
        let deadline = Instant::now() + WAIT;
        while self.handle.status().await.unwrap().connections != count {
            assert!(Instant::now() < deadline, "hub never reached {count} connections");
            sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct Node {
    pub addr: SocketAddr,
    pub handle: NodeHandle,
}

impl Node {
    pub async fn start(id: &str, hub: &Hub) -> Self {
        let relay = EdgeRelay::new(NodeId::new(id), ReconnectPolicy::Manual);
        let node = EdgeNode::new(relay, LocalFanout::new(true), hub.url());
        let (handle, _task) = NodeHandle::spawn(node);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, create_node_router(handle.clone())));
        Node { addr, handle }
    }

    pub async fn wait_for_status(&self, status: &str) {
        let deadline = Instant::now() + WAIT;
        while self.handle.status().await.unwrap().status != status {
            assert!(Instant::now() < deadline, "node never became {status}");
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Open a viewer and wait for its first link status, after which it is
    /// registered for live traffic.
    pub async fn viewer(&self) -> Viewer {
        let (mut ws, _) = connect_async(format!("ws://{}/", self.addr)).await.unwrap();
        next_of_type(&mut ws, "central_status").await;
        ws
    }
}

pub async fn send_json(ws: &mut Viewer, value: &Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON message whose `type` is `kind`, skipping everything else.
pub async fn next_of_type(ws: &mut Viewer, kind: &str) -> Value {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text.to_string()).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("viewer stream ended while waiting for {kind}: {other:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} message within {WAIT:?}"))
}

/// Read for `window` and fail if a message of type `kind` shows up.
pub async fn assert_no_message_of_type(ws: &mut Viewer, kind: &str, window: Duration) {
    let _ = timeout(window, async {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let value: Value = serde_json::from_str(&text.to_string()).unwrap_or(Value::Null);
                assert_ne!(value["type"], kind, "unexpected message: {value}");
            }
        }
    })
    .await;
}
