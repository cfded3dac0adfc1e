use super::{Envelope, Frame, PathRecord, Settings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upstream link status as announced to local viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Every payload shape exchanged between viewers, nodes and the hub.
///
/// Decoding accepts both the verbose (`type`, `frameIndex`, ...) and the
/// compact (`t`, `i`, ...) dialect; encoding always produces the verbose one.
/// Anything that does not decode is `Passthrough` and must be relayed as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    DrawingUpdate {
        #[serde(rename = "frameIndex")]
        frame_index: i64,
        paths: Vec<PathRecord>,
    },
    ClearFrame {
        #[serde(rename = "frameIndex")]
        frame_index: i64,
    },
    SettingsUpdate {
        settings: Settings,
    },
    HistorySnapshot {
        frames: Vec<Frame>,
    },
    CentralStatus {
        status: LinkStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    System {
        message: String,
    },
    #[serde(skip_serializing)]
    Passthrough,
}

impl Payload {
    /// Decode a raw text message, reading the discriminator exactly once.
    pub fn decode(raw: &str) -> Payload {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::decode_object(&map).unwrap_or(Payload::Passthrough),
            _ => Payload::Passthrough,
        }
    }

    /// Decode a message that may be wrapped in an envelope; the envelope's
    /// content is decoded in that case.
    pub fn decode_relayed(raw: &str) -> Payload {
        match Envelope::from_wire(raw) {
            Some(envelope) => Self::decode(&envelope.content),
            None => Self::decode(raw),
        }
    }

    fn decode_object(map: &Map<String, Value>) -> Option<Payload> {
        let tag = field(map, "type", "t")?.as_str()?;
        let payload = match tag {
            "drawing_update" | "u" => Payload::DrawingUpdate {
                frame_index: frame_index(map)?,
                paths: typed(field(map, "paths", "p")?)?,
            },
            "clear_frame" | "clear" => Payload::ClearFrame {
                frame_index: frame_index(map)?,
            },
            "settings_update" | "s" => Payload::SettingsUpdate {
                settings: typed(field(map, "settings", "s")?)?,
            },
            "history_snapshot" | "h" => Payload::HistorySnapshot {
                frames: typed(field(map, "frames", "f")?)?,
            },
            "central_status" | "c" => Payload::CentralStatus {
                status: typed(field(map, "status", "s")?)?,
                url: map.get("url").and_then(Value::as_str).map(str::to_string),
            },
            "system" => Payload::System {
                message: map.get("message")?.as_str()?.to_string(),
            },
            _ => return None,
        };
        Some(payload)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Payload::Passthrough)
    }
}

fn field<'a>(map: &'a Map<String, Value>, verbose: &str, compact: &str) -> Option<&'a Value> {
    map.get(verbose).or_else(|| map.get(compact))
}

fn typed<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}

// The first numeric index wins; a missing index means frame 0. A non-numeric
// index such as "3" counts as missing. A fractional index fails the whole
// payload.
fn frame_index(map: &Map<String, Value>) -> Option<i64> {
    match ["i", "frameIndex"]
        .iter()
        .find_map(|key| map.get(*key).filter(|v| v.is_number()))
    {
        Some(value) => value.as_i64(),
        None => Some(0),
    }
}
