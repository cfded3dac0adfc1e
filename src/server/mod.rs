mod connection;
mod connection_registry;
mod error;
mod hub_session;
mod route;
mod session_loop;
mod telemetry;
pub mod websocket_listener;

pub use connection::{Connection, ConnectionId, Delivery, Outbound, OUTBOUND_QUEUE_CAPACITY};
pub use connection_registry::ConnectionRegistry;
pub use hub_session::{HubSession, HubStatus};
pub use route::{create_hub_router, RegenerateResponse, SettingsResponse};
pub use session_loop::{HubCommand, HubHandle};
pub use telemetry::{init_telemetry, shutdown_telemetry};

use crate::config::HubConfig;
use crate::model::Result;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

impl HubSession {
    pub fn from_config(config: &HubConfig) -> Self {
        HubSession::new(config.authority(), config.settings(), config.frame_cap())
    }
}

/// Serve `router` on `listener` until the process is stopped.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    info!(addr = ?listener.local_addr()?, "Listening");
    axum::serve(listener, router).await?;
    Ok(())
}
