use canvas_relay::config::NodeConfig;
use canvas_relay::node::{create_node_router, EdgeNode, NodeHandle};
use canvas_relay::server::{init_telemetry, serve, shutdown_telemetry};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = NodeConfig::parse();
    init_telemetry("canvas-relay-node")?;

    let (node, _node_task) = NodeHandle::spawn(EdgeNode::from_config(&config));
    info!(node_id = %config.node_id, central_url = %config.central_url, "Edge node starting");

    if let Some(token) = config.token.clone() {
        let node = node.clone();
        tokio::spawn(async move {
            match node.connect(token).await {
                Ok(()) => info!("Connected to the hub"),
                Err(e) => error!(error = %e, "Initial hub connection failed"),
            }
        });
    } else {
        info!("No session key configured; POST one to /api/connect");
    }

    let listener = TcpListener::bind(config.bind).await?;
    let result = serve(listener, create_node_router(node)).await;
    if let Err(e) = &result {
        error!(error = ?e, "Node server stopped");
    }

    shutdown_telemetry();
    Ok(result?)
}
