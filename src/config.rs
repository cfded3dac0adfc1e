use crate::model::constants::{
    DEFAULT_CENTRAL_URL, DEFAULT_FPS, DEFAULT_HEIGHT, DEFAULT_MAX_FRAMES,
    DEFAULT_MAX_PATHS_PER_FRAME, DEFAULT_NODE_ID, DEFAULT_WIDTH, MAX_FRAMES_LIMIT,
};
use crate::model::{NodeId, SessionAuthority, SessionToken, Settings};
use crate::node::{BackoffPolicy, ReconnectPolicy};
use clap::{ArgAction, Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// Hub process configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "hub", version, about = "Authoritative canvas relay hub")]
pub struct HubConfig {
    /// Address to listen on
    #[arg(long, env = "HUB_BIND", default_value = "0.0.0.0:8090")]
    pub bind: SocketAddr,

    #[arg(long, env = "HUB_WIDTH", default_value_t = DEFAULT_WIDTH)]
    pub width: u32,

    #[arg(long, env = "HUB_HEIGHT", default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,

    #[arg(long, env = "HUB_FPS", default_value_t = DEFAULT_FPS)]
    pub fps: u32,

    #[arg(long, env = "HUB_MAX_FRAMES", default_value_t = DEFAULT_MAX_FRAMES)]
    pub max_frames: u32,

    /// Records kept per frame before the oldest are dropped (0 = unbounded)
    #[arg(long, env = "HUB_MAX_PATHS_PER_FRAME", default_value_t = DEFAULT_MAX_PATHS_PER_FRAME)]
    pub max_paths_per_frame: usize,

    /// Fixed initial session token; a random one is generated otherwise
    #[arg(long, env = "HUB_SESSION_TOKEN")]
    pub token: Option<String>,
}

impl HubConfig {
    /// Initial settings; zero values fall back to the defaults and the frame
    /// count is clamped to `MAX_FRAMES_LIMIT`.
    pub fn settings(&self) -> Settings {
        let or_default = |value: u32, default: u32| if value == 0 { default } else { value };
        Settings {
            width: or_default(self.width, DEFAULT_WIDTH),
            height: or_default(self.height, DEFAULT_HEIGHT),
            fps: or_default(self.fps, DEFAULT_FPS),
            max_frames: or_default(self.max_frames, DEFAULT_MAX_FRAMES).min(MAX_FRAMES_LIMIT),
        }
    }

    pub fn frame_cap(&self) -> Option<usize> {
        (self.max_paths_per_frame > 0).then_some(self.max_paths_per_frame)
    }

    pub fn authority(&self) -> SessionAuthority {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => {
                SessionAuthority::with_token(SessionToken::from(token.to_string()))
            }
            _ => SessionAuthority::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReconnectMode {
    /// Stay disconnected until an operator supplies a token again
    Manual,
    /// Retry with exponential backoff and jitter, then open the circuit
    Backoff,
}

/// Edge node process configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "node", version, about = "Edge relay node for the canvas hub")]
pub struct NodeConfig {
    /// Address viewers connect to
    #[arg(long, env = "NODE_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    #[arg(long, env = "NODE_ID", default_value = DEFAULT_NODE_ID)]
    pub node_id: String,

    /// Websocket URL of the hub
    #[arg(long, env = "CENTRAL_SERVER_URL", default_value = DEFAULT_CENTRAL_URL)]
    pub central_url: String,

    /// Session token to connect with at start-up
    #[arg(long, env = "NODE_SESSION_TOKEN")]
    pub token: Option<String>,

    #[arg(long, value_enum, default_value_t = ReconnectMode::Manual)]
    pub reconnect: ReconnectMode,

    #[arg(long, default_value_t = 500)]
    pub backoff_base_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub backoff_max_ms: u64,

    #[arg(long, default_value_t = 8)]
    pub backoff_max_attempts: u32,

    /// Push the last settings and history to viewers as they join
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub mirror: bool,

    /// Records mirrored per frame before the oldest are dropped (0 = unbounded)
    #[arg(long, env = "NODE_MIRROR_MAX_PATHS_PER_FRAME", default_value_t = DEFAULT_MAX_PATHS_PER_FRAME)]
    pub mirror_max_paths_per_frame: usize,
}

impl NodeConfig {
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    pub fn mirror_frame_cap(&self) -> Option<usize> {
        (self.mirror_max_paths_per_frame > 0).then_some(self.mirror_max_paths_per_frame)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        match self.reconnect {
            ReconnectMode::Manual => ReconnectPolicy::Manual,
            ReconnectMode::Backoff => ReconnectPolicy::Backoff(BackoffPolicy {
                base: Duration::from_millis(self.backoff_base_ms.max(1)),
                max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
                max_attempts: self.backoff_max_attempts.max(1),
            }),
        }
    }
}
