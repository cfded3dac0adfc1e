use canvas_relay::config::HubConfig;
use canvas_relay::server::{
    create_hub_router, init_telemetry, serve, shutdown_telemetry, HubHandle, HubSession,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = HubConfig::parse();
    init_telemetry("canvas-relay-hub")?;

    let session = HubSession::from_config(&config);
    info!(
        token = %session.current_token(),
        settings = ?session.settings(),
        "Session key"
    );
    let (hub, _session_task) = HubHandle::spawn(session);

    let listener = TcpListener::bind(config.bind).await?;
    let result = serve(listener, create_hub_router(hub)).await;
    if let Err(e) = &result {
        error!(error = ?e, "Hub server stopped");
    }

    shutdown_telemetry();
    Ok(result?)
}
