use super::{Connection, ConnectionId, ConnectionRegistry, Outbound};
use crate::model::constants::{
    preview, LOG_PREVIEW_CHARS, SESSION_CHANGED_CLOSE_CODE, SESSION_CHANGED_NOTICE,
    SESSION_CHANGED_REASON,
};
use crate::model::{
    HistoryStore, Payload, RelayError, Result, SessionAuthority, SessionToken, Settings,
    SettingsPatch,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Administrative view of the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    pub session_key: SessionToken,
    pub connections: usize,
    pub settings: Settings,
}

/// All authoritative hub state: token, settings, history and the node registry.
///
/// Owned by exactly one task; every method runs to completion before the next
/// event is looked at, so none of this needs a lock.
#[derive(Debug)]
pub struct HubSession {
    authority: SessionAuthority,
    settings: Settings,
    history: HistoryStore,
    registry: ConnectionRegistry,
}

impl HubSession {
    pub fn new(
        authority: SessionAuthority,
        settings: Settings,
        max_paths_per_frame: Option<usize>,
    ) -> Self {
        HubSession {
            authority,
            history: HistoryStore::with_frame_cap(settings.max_frames, max_paths_per_frame),
            settings,
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn current_token(&self) -> &SessionToken {
        self.authority.current_token()
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registry.contains(id)
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            session_key: self.current_token().clone(),
            connections: self.registry.len(),
            settings: self.settings,
        }
    }

    pub fn authorize(&self, candidate: Option<&str>) -> bool {
        match candidate {
            Some(candidate) if self.authority.validate(candidate) => true,
            received => {
                warn!(?received, expected = %self.current_token(), "Connection attempt rejected, invalid key");
                false
            }
        }
    }

    /// Accept `connection` under `candidate`: push settings and the full
    /// history, then register it for live traffic. A stale token closes the
    /// connection and leaves the registry untouched.
    #[instrument(skip(self, candidate, connection), fields(connection_id = ?connection.id))]
    pub fn join(&mut self, candidate: Option<&str>, connection: Connection) -> Result<()> {
        if !self.authorize(candidate) {
            connection.close(SESSION_CHANGED_CLOSE_CODE, SESSION_CHANGED_REASON);
            return Err(RelayError::Unauthorized);
        }

        let settings = Payload::SettingsUpdate {
            settings: self.settings,
        };
        let snapshot = Payload::HistorySnapshot {
            frames: self.history.snapshot().to_vec(),
        };
        for payload in [settings, snapshot] {
            connection.send_text(payload.encode()?);
        }

        self.registry.add(connection);
        info!(connections = self.registry.len(), "Node connected");
        Ok(())
    }

    pub fn leave(&mut self, id: ConnectionId) {
        if self.registry.remove(id).is_some() {
            info!(connection_id = ?id, connections = self.registry.len(), "Node disconnected");
        }
    }

    /// Replace the token, close every connection with a session-changed
    /// notice and start over with empty history.
    #[instrument(skip(self))]
    pub fn rotate(&mut self) -> SessionToken {
        let token = self.authority.rotate().clone();
        let notice = Payload::System {
            message: SESSION_CHANGED_NOTICE.to_string(),
        }
        .encode()
        .ok();
        let closed = self.registry.close_all(
            notice.as_deref(),
            SESSION_CHANGED_CLOSE_CODE,
            SESSION_CHANGED_REASON,
        );
        self.history.reset();
        info!(closed, "Session rotated, all connections closed");
        token
    }

    /// Merge `patch` into the settings, resize history when `maxFrames`
    /// changed, and broadcast the full result to every node.
    #[instrument(skip(self))]
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Result<Settings> {
        let merged = self.settings.merge(patch);
        if merged.max_frames != self.settings.max_frames {
            info!(
                from = self.settings.max_frames,
                to = merged.max_frames,
                "Resizing history"
            );
            self.history.resize(merged.max_frames);
        }
        self.settings = merged;

        let encoded = Payload::SettingsUpdate { settings: merged }.encode()?;
        let delivered = self.registry.broadcast(&Outbound::Text(encoded));
        info!(?merged, delivered, "Settings broadcast");
        Ok(merged)
    }

    /// Apply any recognised drawing command to history, then relay `raw`
    /// unmodified to every registered connection, the sender included.
    /// Loop prevention is left to the receiving nodes.
    pub fn handle_text(&mut self, from: ConnectionId, raw: &str) -> usize {
        match Payload::decode_relayed(raw) {
            Payload::DrawingUpdate { frame_index, paths } => {
                let count = paths.len();
                if self.history.append(frame_index, paths) {
                    debug!(frame_index, count, "Stored drawing update");
                }
            }
            Payload::ClearFrame { frame_index } => {
                if self.history.clear(frame_index) {
                    debug!(frame_index, "Cleared frame");
                }
            }
            _ => {}
        }

        debug!(connection_id = ?from, preview = preview(raw, LOG_PREVIEW_CHARS), "Broadcasting");
        self.registry.broadcast(&Outbound::Text(raw.to_string()))
    }

    pub fn handle_binary(&mut self, from: ConnectionId, data: Vec<u8>) -> usize {
        debug!(connection_id = ?from, len = data.len(), "Broadcasting binary");
        self.registry.broadcast(&Outbound::Binary(data))
    }
}
