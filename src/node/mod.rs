mod fanout;
mod node_loop;
mod relay;
mod route;
mod upstream;
mod websocket_listener;

pub use fanout::LocalFanout;
pub use node_loop::{EdgeNode, NodeCommand, NodeHandle, NodeStatus};
pub use relay::{BackoffPolicy, EdgeRelay, LinkLoss, ReconnectPolicy, RelayState, UpstreamMessage};
pub use route::{create_node_router, ConnectRequest, ConnectResponse};
pub use upstream::{handshake_url, spawn_link, LinkEvent, UpstreamLink};

use crate::config::NodeConfig;

impl EdgeNode {
    pub fn from_config(config: &NodeConfig) -> Self {
        EdgeNode::new(
            EdgeRelay::new(config.node_id(), config.reconnect_policy()),
            LocalFanout::with_frame_cap(config.mirror, config.mirror_frame_cap()),
            config.central_url.clone(),
        )
    }
}
