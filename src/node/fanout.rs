use crate::model::constants::DEFAULT_MAX_PATHS_PER_FRAME;
use crate::model::{HistoryStore, LinkStatus, Payload, Settings};
use crate::server::{Connection, ConnectionId, ConnectionRegistry, Outbound};
use tracing::{debug, error, instrument};

/// Last hub state seen by a node, replayed to viewers as they join.
#[derive(Debug)]
struct Mirror {
    settings: Option<Settings>,
    history: Option<HistoryStore>,
    frame_cap: Option<usize>,
}

impl Mirror {
    fn new(frame_cap: Option<usize>) -> Self {
        Mirror {
            settings: None,
            history: None,
            frame_cap,
        }
    }

    fn store(&self, max_frames: u32) -> HistoryStore {
        HistoryStore::with_frame_cap(max_frames, self.frame_cap)
    }

    fn apply(&mut self, payload: &Payload) {
        match payload {
            Payload::SettingsUpdate { settings } => {
                match self.history.as_mut() {
                    Some(history) => history.resize(settings.max_frames),
                    None => self.history = Some(self.store(settings.max_frames)),
                }
                self.settings = Some(*settings);
            }
            Payload::HistorySnapshot { frames } => {
                if self.history.is_none() {
                    self.history = Some(self.store(frames.len() as u32));
                }
                if let Some(history) = self.history.as_mut() {
                    history.replace(frames.clone());
                }
            }
            Payload::DrawingUpdate { frame_index, paths } => {
                if let Some(history) = self.history.as_mut() {
                    history.append(*frame_index, paths.iter().cloned());
                }
            }
            Payload::ClearFrame { frame_index } => {
                if let Some(history) = self.history.as_mut() {
                    history.clear(*frame_index);
                }
            }
            _ => {}
        }
    }
}

fn encode(payload: &Payload) -> Option<String> {
    match payload.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = ?e, "Failed to encode payload");
            None
        }
    }
}

/// The local viewers of one node.
#[derive(Debug)]
pub struct LocalFanout {
    viewers: ConnectionRegistry,
    link: LinkStatus,
    hub_url: Option<String>,
    mirror: Option<Mirror>,
}

impl LocalFanout {
    pub fn new(mirror: bool) -> Self {
        Self::with_frame_cap(mirror, Some(DEFAULT_MAX_PATHS_PER_FRAME))
    }

    /// `frame_cap` bounds the records mirrored per frame; `None` keeps all.
    pub fn with_frame_cap(mirror: bool, frame_cap: Option<usize>) -> Self {
        LocalFanout {
            viewers: ConnectionRegistry::new(),
            link: LinkStatus::Disconnected,
            hub_url: None,
            mirror: mirror.then(|| Mirror::new(frame_cap)),
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link
    }

    fn status_payload(&self) -> Payload {
        Payload::CentralStatus {
            status: self.link,
            url: match self.link {
                LinkStatus::Connected => self.hub_url.clone(),
                LinkStatus::Disconnected => None,
            },
        }
    }

    /// Catch the viewer up (link status, then settings and history when
    /// mirroring) and only then register it for live traffic.
    #[instrument(skip(self, viewer), fields(viewer_id = ?viewer.id))]
    pub fn join(&mut self, viewer: Connection) {
        let mut catch_up = vec![self.status_payload()];
        if let Some(mirror) = &self.mirror {
            if let Some(settings) = mirror.settings {
                catch_up.push(Payload::SettingsUpdate { settings });
            }
            if let Some(history) = &mirror.history {
                catch_up.push(Payload::HistorySnapshot {
                    frames: history.snapshot().to_vec(),
                });
            }
        }
        for payload in &catch_up {
            if let Some(text) = encode(payload) {
                viewer.send_text(text);
            }
        }
        self.viewers.add(viewer);
        debug!(viewers = self.viewers.len(), "Viewer joined");
    }

    pub fn leave(&mut self, id: ConnectionId) {
        if self.viewers.remove(id).is_some() {
            debug!(viewer_id = ?id, viewers = self.viewers.len(), "Viewer left");
        }
    }

    pub fn broadcast(&mut self, text: &str) -> usize {
        self.viewers.broadcast(&Outbound::Text(text.to_string()))
    }

    pub fn broadcast_binary(&mut self, data: Vec<u8>) -> usize {
        self.viewers.broadcast(&Outbound::Binary(data))
    }

    pub fn broadcast_except(&mut self, origin: ConnectionId, text: &str) -> usize {
        self.viewers
            .broadcast_except(origin, &Outbound::Text(text.to_string()))
    }

    /// Record the upstream link status; viewers hear about changes only.
    pub fn set_link_status(&mut self, status: LinkStatus, hub_url: Option<String>) -> bool {
        if status == self.link {
            return false;
        }
        self.link = status;
        self.hub_url = hub_url;
        if let Some(text) = encode(&self.status_payload()) {
            self.broadcast(&text);
        }
        true
    }

    /// Update the mirror from a message that came down from the hub.
    pub fn observe(&mut self, text: &str) {
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.apply(&Payload::decode(text));
        }
    }

    pub fn mirrored_settings(&self) -> Option<Settings> {
        self.mirror.as_ref().and_then(|mirror| mirror.settings)
    }

    pub fn mirrored_history(&self) -> Option<&HistoryStore> {
        self.mirror.as_ref().and_then(|mirror| mirror.history.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PathRecord;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::Receiver;

    fn drain(rx: &mut Receiver<Outbound>) -> Vec<Value> {
        let mut received = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            received.push(serde_json::from_str(&text).unwrap());
        }
        received
    }

    fn settings(max_frames: u32) -> String {
        json!({"type": "settings_update", "settings": {
            "width": 800, "height": 600, "fps": 8, "maxFrames": max_frames
        }})
        .to_string()
    }

    #[test]
    fn test_join_without_mirror_only_sends_status() {
        let mut fanout = LocalFanout::new(false);
        fanout.observe(&settings(3));

        let (viewer, mut rx) = Connection::channel();
        fanout.join(viewer);

        assert_eq!(
            drain(&mut rx),
            vec![json!({"type": "central_status", "status": "disconnected"})]
        );
        assert_eq!(fanout.viewer_count(), 1);
    }

    #[test]
    fn test_join_replays_mirror_in_order() {
        let mut fanout = LocalFanout::new(true);
        fanout.set_link_status(LinkStatus::Connected, Some("ws://hub".to_string()));
        fanout.observe(&settings(2));
        fanout.observe(r#"{"t":"u","i":1,"p":["M 0 0"]}"#);

        let (viewer, mut rx) = Connection::channel();
        fanout.join(viewer);
        let received = drain(&mut rx);

        assert_eq!(received.len(), 3);
        assert_eq!(
            received[0],
            json!({"type": "central_status", "status": "connected", "url": "ws://hub"})
        );
        assert_eq!(received[1]["type"], "settings_update");
        assert_eq!(received[1]["settings"]["maxFrames"], 2);
        assert_eq!(received[2]["type"], "history_snapshot");
        assert_eq!(received[2]["frames"][0], json!([]));
        assert_eq!(received[2]["frames"][1][0]["d"], "M 0 0");
    }

    #[test]
    fn test_mirror_follows_hub_traffic() {
        let mut fanout = LocalFanout::new(true);
        fanout.observe(&settings(3));
        fanout.observe(r#"{"type":"drawing_update","frameIndex":0,"paths":["M 1 1"]}"#);
        fanout.observe(r#"{"type":"drawing_update","frameIndex":2,"paths":["M 2 2"]}"#);
        fanout.observe(r#"{"t":"clear","i":2}"#);
        fanout.observe("not json");

        let history = fanout.mirrored_history().unwrap();
        assert_eq!(history.frame(0), Some(&vec![PathRecord::new("M 1 1")]));
        assert_eq!(history.frame(2), Some(&vec![]));

        fanout.observe(&settings(1));
        assert_eq!(fanout.mirrored_history().unwrap().len(), 1);
        assert_eq!(fanout.mirrored_settings().unwrap().max_frames, 1);
    }

    #[test]
    fn test_snapshot_without_settings_sizes_the_mirror() {
        let mut fanout = LocalFanout::new(true);
        fanout.observe(r#"{"t":"h","f":[[],["M 0 0"]]}"#);
        let history = fanout.mirrored_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.frame(1), Some(&vec![PathRecord::new("M 0 0")]));
    }

    #[test]
    fn test_mirror_frame_cap() {
        let strokes = r#"{"type":"drawing_update","frameIndex":0,"paths":["M 1 1","M 2 2","M 3 3"]}"#;

        let mut capped = LocalFanout::with_frame_cap(true, Some(2));
        capped.observe(&settings(1));
        capped.observe(strokes);
        assert_eq!(
            capped.mirrored_history().unwrap().frame(0),
            Some(&vec![PathRecord::new("M 2 2"), PathRecord::new("M 3 3")])
        );

        let mut unbounded = LocalFanout::with_frame_cap(true, None);
        unbounded.observe(&settings(1));
        unbounded.observe(strokes);
        assert_eq!(unbounded.mirrored_history().unwrap().frame(0).unwrap().len(), 3);
    }

    #[test]
    fn test_broadcast_except_skips_origin() {
        let mut fanout = LocalFanout::new(false);
        let (origin, mut origin_rx) = Connection::channel();
        let (other, mut other_rx) = Connection::channel();
        let origin_id = origin.id;
        fanout.join(origin);
        fanout.join(other);
        drain(&mut origin_rx);
        drain(&mut other_rx);

        assert_eq!(fanout.broadcast_except(origin_id, r#"{"t":"clear"}"#), 1);
        assert!(drain(&mut origin_rx).is_empty());
        assert_eq!(drain(&mut other_rx), vec![json!({"t": "clear"})]);
    }

    #[test]
    fn test_link_status_announced_on_change_only() {
        let mut fanout = LocalFanout::new(false);
        let (viewer, mut rx) = Connection::channel();
        fanout.join(viewer);
        drain(&mut rx);

        assert!(!fanout.set_link_status(LinkStatus::Disconnected, None));
        assert!(drain(&mut rx).is_empty());

        assert!(fanout.set_link_status(LinkStatus::Connected, None));
        assert_eq!(
            drain(&mut rx),
            vec![json!({"type": "central_status", "status": "connected"})]
        );
    }

    #[test]
    fn test_leave_stops_delivery() {
        let mut fanout = LocalFanout::new(false);
        let (viewer, mut rx) = Connection::channel();
        let id = viewer.id;
        fanout.join(viewer);
        drain(&mut rx);

        fanout.leave(id);
        assert_eq!(fanout.broadcast("{}"), 0);
        assert_eq!(fanout.viewer_count(), 0);
    }
}
