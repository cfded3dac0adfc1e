use super::upstream::{handshake_url, spawn_link, LinkEvent, UpstreamLink};
use super::{EdgeRelay, LinkLoss, LocalFanout, UpstreamMessage};
use crate::model::constants::{preview, LOG_PREVIEW_CHARS};
use crate::model::{LinkStatus, NodeId, Payload, RelayError, Result};
use crate::server::{Connection, ConnectionId};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Administrative view of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub status: &'static str,
    pub node_id: NodeId,
}

#[derive(Debug)]
pub enum NodeCommand {
    ViewerJoined {
        viewer: Connection,
    },
    ViewerMessage {
        from: ConnectionId,
        text: String,
    },
    ViewerLeft {
        id: ConnectionId,
    },
    Connect {
        token: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
}

/// Everything one edge node owns: its upstream relay, local viewers and the
/// link currently in use.
#[derive(Debug)]
pub struct EdgeNode {
    relay: EdgeRelay,
    fanout: LocalFanout,
    central_url: String,
    link: Option<UpstreamLink>,
    pending: Option<(u64, oneshot::Sender<Result<()>>)>,
}

impl EdgeNode {
    pub fn new(relay: EdgeRelay, fanout: LocalFanout, central_url: impl Into<String>) -> Self {
        EdgeNode {
            relay,
            fanout,
            central_url: central_url.into(),
            link: None,
            pending: None,
        }
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            status: self.relay.state().label(),
            node_id: self.relay.node_id().clone(),
        }
    }

    fn connect(
        &mut self,
        token: String,
        reply: oneshot::Sender<Result<()>>,
        events: &UnboundedSender<LinkEvent>,
    ) {
        let token = token.trim().to_string();
        if token.is_empty() {
            let _ = reply.send(Err(RelayError::MissingToken));
            return;
        }
        let url = match handshake_url(&self.central_url, &token) {
            Ok(url) => url,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        if self.link.take().is_some() {
            info!("Closing existing upstream link to connect with new key");
        }
        if let Some((_, superseded)) = self.pending.take() {
            let _ = superseded.send(Err(RelayError::Upstream(
                "superseded by a newer connect request".to_string(),
            )));
        }

        let generation = self.relay.begin_connect(token);
        self.fanout.set_link_status(LinkStatus::Disconnected, None);
        self.link = Some(spawn_link(url, generation, events.clone()));
        self.pending = Some((generation, reply));
    }

    fn resolve(&mut self, generation: u64, outcome: Result<()>) {
        if matches!(&self.pending, Some((pending, _)) if *pending == generation) {
            if let Some((_, reply)) = self.pending.take() {
                let _ = reply.send(outcome);
            }
        }
    }

    fn handle_command(&mut self, command: NodeCommand, events: &UnboundedSender<LinkEvent>) {
        match command {
            NodeCommand::ViewerJoined { viewer } => self.fanout.join(viewer),
            NodeCommand::ViewerMessage { from, text } => self.on_viewer_message(from, &text),
            NodeCommand::ViewerLeft { id } => self.fanout.leave(id),
            NodeCommand::Connect { token, reply } => self.connect(token, reply, events),
            NodeCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn on_viewer_message(&mut self, from: ConnectionId, text: &str) {
        self.fanout.broadcast_except(from, text);
        if let Err(e) = self.forward_upstream(text) {
            debug!(error = %e, "Viewer message kept local");
        }
    }

    /// Wrap `text` in this node's envelope and queue it on the hub link.
    fn forward_upstream(&self, text: &str) -> Result<()> {
        let envelope = self
            .relay
            .wrap_outbound(text)
            .ok_or(RelayError::NotConnected)?;
        let link = self.link.as_ref().ok_or(RelayError::NotConnected)?;
        if link.send(envelope.to_wire()?) {
            Ok(())
        } else {
            Err(RelayError::NotConnected)
        }
    }

    fn handle_event(&mut self, event: LinkEvent, events: &UnboundedSender<LinkEvent>) {
        match event {
            LinkEvent::Accepted { generation } => {
                if !self.relay.on_accepted(generation) {
                    return;
                }
                let hello = Payload::System {
                    message: format!("Hello from {}!", self.relay.node_id()),
                };
                let sent = hello
                    .encode()
                    .map_err(RelayError::from)
                    .and_then(|text| self.forward_upstream(&text));
                if let Err(e) = sent {
                    error!(error = %e, "Failed to send hello");
                }
                self.fanout
                    .set_link_status(LinkStatus::Connected, Some(self.central_url.clone()));
                self.resolve(generation, Ok(()));
            }
            LinkEvent::Rejected { generation } => {
                if self.relay.on_rejected(generation) {
                    self.link = None;
                    self.fanout.set_link_status(LinkStatus::Disconnected, None);
                    self.resolve(generation, Err(RelayError::Unauthorized));
                }
            }
            LinkEvent::Failed { generation, error } => {
                self.on_link_lost(generation, events);
                self.resolve(generation, Err(RelayError::Upstream(error)));
            }
            LinkEvent::Closed { generation } => self.on_link_lost(generation, events),
            LinkEvent::Message { generation, text } => {
                if self.relay.is_current(generation) {
                    self.on_upstream_message(&text);
                }
            }
            LinkEvent::Binary { generation, data } => {
                if self.relay.is_current(generation) {
                    debug!(len = data.len(), "Forwarding binary frame to local viewers");
                    self.fanout.broadcast_binary(data);
                }
            }
            LinkEvent::RetryDue { generation } => {
                let Some((generation, token)) = self.relay.begin_retry(generation) else {
                    return;
                };
                match handshake_url(&self.central_url, &token) {
                    Ok(url) => self.link = Some(spawn_link(url, generation, events.clone())),
                    Err(e) => {
                        error!(error = ?e, "Cannot retry upstream");
                        self.on_link_lost(generation, events);
                    }
                }
            }
        }
    }

    fn on_upstream_message(&mut self, text: &str) {
        match self.relay.classify(text) {
            UpstreamMessage::SelfEcho(content) => {
                debug!("Ignoring own message echoed by the hub");
                self.fanout.observe(&content);
            }
            UpstreamMessage::Relayed(content) | UpstreamMessage::Direct(content) => {
                debug!(
                    preview = preview(&content, LOG_PREVIEW_CHARS),
                    "Forwarding to local viewers"
                );
                self.fanout.observe(&content);
                self.fanout.broadcast(&content);
            }
        }
    }

    fn on_link_lost(&mut self, generation: u64, events: &UnboundedSender<LinkEvent>) {
        let loss = self.relay.on_link_lost(generation);
        if loss == LinkLoss::Stale {
            return;
        }
        self.link = None;
        self.fanout.set_link_status(LinkStatus::Disconnected, None);
        match loss {
            LinkLoss::RetryIn { delay, attempt } => {
                info!(?delay, attempt, "Scheduling upstream retry");
                let events = events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(LinkEvent::RetryDue { generation });
                });
            }
            LinkLoss::CircuitOpened => warn!("Upstream circuit open; a new key is required"),
            _ => info!("Upstream link down; waiting for a new key"),
        }
    }
}

/// Cloneable front door to the task that owns the `EdgeNode`.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: UnboundedSender<NodeCommand>,
}

impl NodeHandle {
    pub fn spawn(node: EdgeNode) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(node, rx));
        (NodeHandle { commands }, task)
    }

    pub fn viewer_joined(&self, viewer: Connection) -> Result<()> {
        self.submit(NodeCommand::ViewerJoined { viewer })
    }

    pub fn viewer_message(&self, from: ConnectionId, text: String) -> Result<()> {
        self.submit(NodeCommand::ViewerMessage { from, text })
    }

    pub fn viewer_left(&self, id: ConnectionId) -> Result<()> {
        self.submit(NodeCommand::ViewerLeft { id })
    }

    /// Connect upstream with `token` and wait until the hub accepts or
    /// refuses it.
    pub async fn connect(&self, token: String) -> Result<()> {
        self.request(|reply| NodeCommand::Connect { token, reply })
            .await?
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        self.request(|reply| NodeCommand::Status { reply }).await
    }

    fn submit(&self, command: NodeCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::ChannelClosed)
    }

    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> NodeCommand,
    {
        let (reply, response) = oneshot::channel();
        self.submit(command(reply))?;
        response.await.map_err(|_| RelayError::ChannelClosed)
    }
}

#[instrument(skip(node, commands), fields(node_id = %node.relay.node_id()))]
async fn run(mut node: EdgeNode, mut commands: UnboundedReceiver<NodeCommand>) {
    info!("Node loop started");
    let (events, mut link_events) = mpsc::unbounded_channel();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => node.handle_command(command, &events),
                None => break,
            },
            Some(event) = link_events.recv() => node.handle_event(event, &events),
        }
    }
    debug!("Node loop stopped");
}
