use super::{Connection, ConnectionId, HubSession, HubStatus};
use crate::model::{RelayError, Result, SessionToken, Settings, SettingsPatch};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Everything that can happen to the hub session.
#[derive(Debug)]
pub enum HubCommand {
    Authorize {
        token: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    Join {
        token: Option<String>,
        connection: Connection,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        id: ConnectionId,
    },
    Text {
        from: ConnectionId,
        text: String,
    },
    Binary {
        from: ConnectionId,
        data: Vec<u8>,
    },
    Status {
        reply: oneshot::Sender<HubStatus>,
    },
    Rotate {
        reply: oneshot::Sender<SessionToken>,
    },
    UpdateSettings {
        patch: SettingsPatch,
        reply: oneshot::Sender<Result<Settings>>,
    },
}

/// Cloneable front door to the task that owns the `HubSession`.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Move `session` into its own task and return a handle to it.
    pub fn spawn(session: HubSession) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(session, rx));
        (HubHandle { commands }, task)
    }

    pub async fn authorize(&self, token: Option<String>) -> Result<bool> {
        self.request(|reply| HubCommand::Authorize { token, reply })
            .await
    }

    pub async fn join(&self, token: Option<String>, connection: Connection) -> Result<()> {
        self.request(|reply| HubCommand::Join {
            token,
            connection,
            reply,
        })
        .await?
    }

    pub fn leave(&self, id: ConnectionId) -> Result<()> {
        self.submit(HubCommand::Leave { id })
    }

    pub fn relay_text(&self, from: ConnectionId, text: String) -> Result<()> {
        self.submit(HubCommand::Text { from, text })
    }

    pub fn relay_binary(&self, from: ConnectionId, data: Vec<u8>) -> Result<()> {
        self.submit(HubCommand::Binary { from, data })
    }

    pub async fn status(&self) -> Result<HubStatus> {
        self.request(|reply| HubCommand::Status { reply }).await
    }

    pub async fn rotate(&self) -> Result<SessionToken> {
        self.request(|reply| HubCommand::Rotate { reply }).await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        self.request(|reply| HubCommand::UpdateSettings { patch, reply })
            .await?
    }

    fn submit(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::ChannelClosed)
    }

    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> HubCommand,
    {
        let (reply, response) = oneshot::channel();
        self.submit(command(reply))?;
        response.await.map_err(|_| RelayError::ChannelClosed)
    }
}

#[instrument(skip(session, commands))]
async fn run(mut session: HubSession, mut commands: UnboundedReceiver<HubCommand>) {
    info!(token = %session.current_token(), "Hub session loop started");
    while let Some(command) = commands.recv().await {
        handle_command(&mut session, command);
    }
    debug!("Hub session loop stopped");
}

fn handle_command(session: &mut HubSession, command: HubCommand) {
    match command {
        HubCommand::Authorize { token, reply } => {
            let _ = reply.send(session.authorize(token.as_deref()));
        }
        HubCommand::Join {
            token,
            connection,
            reply,
        } => {
            let _ = reply.send(session.join(token.as_deref(), connection));
        }
        HubCommand::Leave { id } => session.leave(id),
        HubCommand::Text { from, text } => {
            session.handle_text(from, &text);
        }
        HubCommand::Binary { from, data } => {
            session.handle_binary(from, data);
        }
        HubCommand::Status { reply } => {
            let _ = reply.send(session.status());
        }
        HubCommand::Rotate { reply } => {
            let _ = reply.send(session.rotate());
        }
        HubCommand::UpdateSettings { patch, reply } => {
            let _ = reply.send(session.update_settings(&patch));
        }
    }
}
